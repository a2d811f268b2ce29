//! # Sidecar Fallback Tests
//!
//! A 256 MiB payload is far past the inline limit (255 sectors of 512
//! bytes), so a put through the bundled store must divert it into the
//! region's `.ext` sidecar and read it back byte-exactly, with the inline
//! sector-map slot left empty. The batched path must do the same and
//! clear the written key from the caller's map.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tempfile::tempdir;

use regionkv::key::ENTRIES_PER_REGION_3D;
use regionkv::{Grid3d, RegionFile, SpatialStore};

const OVERSIZED: usize = 256 * 1024 * 1024;

fn oversized_payload() -> Vec<u8> {
    let mut payload = vec![0u8; OVERSIZED];
    StdRng::seed_from_u64(123_456_789).fill_bytes(&mut payload);
    payload
}

#[test]
fn oversized_put_diverts_to_the_sidecar() {
    let dir = tempdir().unwrap();
    let store = SpatialStore::open(dir.path()).unwrap();
    let key = Grid3d.key(0, 0, 0);
    let payload = oversized_payload();

    store.put_3d(0, 0, 0, &payload).unwrap();

    assert_eq!(store.get_3d(0, 0, 0).unwrap().unwrap(), payload);

    let sidecar_entry = dir
        .path()
        .join("region3d")
        .join("0.0.0.3dr.ext")
        .join(key.id().to_string());
    assert!(sidecar_entry.is_file());

    // the inline slot stayed empty
    let mut inline = RegionFile::builder()
        .directory(dir.path().join("region3d"))
        .region_key(key.region_key().clone())
        .key_count(ENTRIES_PER_REGION_3D)
        .sector_size(512)
        .open()
        .unwrap();
    assert!(!inline.has(&key).unwrap());

    store.close().unwrap();
}

#[test]
fn oversized_batched_put_clears_the_map_and_reads_back() {
    let dir = tempdir().unwrap();
    let store = SpatialStore::open(dir.path()).unwrap();
    let payload = oversized_payload();

    let mut batch = HashMap::new();
    batch.insert(Grid3d.key(0, 0, 0), payload.clone());
    store.put_many_3d(&mut batch).unwrap();

    assert!(batch.is_empty());
    assert_eq!(store.get_3d(0, 0, 0).unwrap().unwrap(), payload);

    store.close().unwrap();
}
