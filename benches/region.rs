//! # Region Storage Benchmarks
//!
//! Measures the core inline region operations and the shared-cache access
//! path:
//!
//! | Benchmark          | What it measures                              |
//! |--------------------|-----------------------------------------------|
//! | write_4k           | Inline write of a 4 KiB payload, fresh id     |
//! | overwrite_4k       | Inline rewrite of the same id (sector reuse)  |
//! | read_4k            | Inline read of a 4 KiB payload                |
//! | cached_read_4k     | The same read through the shared cache        |
//!
//! Payloads of 4 KiB span multiple 512-byte sectors, so writes exercise
//! the allocator's run search rather than the single-sector fast path.
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench region
//! cargo bench --bench region -- read    # only the read benchmarks
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::tempdir;

use regionkv::key::ENTRIES_PER_REGION_2D;
use regionkv::{Grid2d, RegionFile, SharedCache, SharedCachedRegionProvider, SimpleRegionFactory};

const PAYLOAD: usize = 4096;

fn open_region(dir: &std::path::Path) -> RegionFile {
    let key = Grid2d.key(0, 0);
    RegionFile::builder()
        .directory(dir)
        .region_key(key.region_key().clone())
        .key_count(ENTRIES_PER_REGION_2D)
        .sector_size(512)
        .open()
        .unwrap()
}

fn bench_writes(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut region = open_region(dir.path());
    let payload = vec![0xA5u8; PAYLOAD];

    let mut id = 0u32;
    c.bench_function("write_4k", |b| {
        b.iter(|| {
            let key = Grid2d.key((id % 32) as i32, ((id / 32) % 32) as i32);
            id = id.wrapping_add(1);
            region.write(black_box(&key), black_box(&payload)).unwrap();
        })
    });

    let key = Grid2d.key(0, 0);
    c.bench_function("overwrite_4k", |b| {
        b.iter(|| {
            region.write(black_box(&key), black_box(&payload)).unwrap();
        })
    });
}

fn bench_reads(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut region = open_region(dir.path());
    let payload = vec![0x5Au8; PAYLOAD];
    let key = Grid2d.key(7, 3);
    region.write(&key, &payload).unwrap();

    c.bench_function("read_4k", |b| {
        b.iter(|| {
            let value = region.read(black_box(&key)).unwrap().unwrap();
            black_box(value);
        })
    });

    let cache = Arc::new(SharedCache::new(16).unwrap());
    let factory: Arc<dyn regionkv::RegionFactory> =
        Arc::new(SimpleRegionFactory::new(Grid2d, dir.path(), 512));
    let provider = SharedCachedRegionProvider::with_cache(Arc::clone(&factory), cache);
    c.bench_function("cached_read_4k", |b| {
        b.iter(|| {
            let mut value = None;
            regionkv::RegionProvider::for_region(&provider, key.region_key(), &mut |r| {
                value = r.read(&key)?;
                Ok(())
            })
            .unwrap();
            black_box(value.unwrap());
        })
    });
}

criterion_group!(benches, bench_writes, bench_reads);
criterion_main!(benches);
