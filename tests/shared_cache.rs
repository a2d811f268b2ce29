//! # Shared Cache Eviction Tests
//!
//! With a hard capacity of 4 open regions, touching 10 distinct regions
//! must keep the steady-state population at or below 4, and re-reading a
//! long-evicted region must transparently reopen it with its data intact.
//! Flushing before a fresh open must make writes visible to an unrelated
//! store over the same directory.

use std::sync::Arc;

use tempfile::tempdir;

use regionkv::{
    Grid2d, RegionStore, SharedCache, SharedCachedRegionProvider, SimpleRegionFactory,
};

fn store_with_cache(dir: &std::path::Path, cache: Arc<SharedCache>) -> RegionStore {
    let factory = Arc::new(SimpleRegionFactory::new(Grid2d, dir, 512));
    RegionStore::new(vec![Arc::new(SharedCachedRegionProvider::with_cache(
        factory, cache,
    ))])
}

#[test]
fn population_is_bounded_and_evicted_regions_reopen() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SharedCache::new(4).unwrap());
    let store = store_with_cache(dir.path(), Arc::clone(&cache));

    for i in 0..10 {
        // x stride of 32 puts every key in its own region
        let key = Grid2d.key(i * 32, 0);
        store.put(&key, format!("payload {i}").as_bytes()).unwrap();
        assert!(cache.len() <= 4, "cache exceeded its hard cap");
    }

    assert!(cache.len() <= 4);

    for i in 0..10 {
        let key = Grid2d.key(i * 32, 0);
        let value = store.get(&key, true).unwrap().unwrap();
        assert_eq!(value, format!("payload {i}").as_bytes());
    }
}

#[test]
fn flushed_writes_survive_a_fresh_store() {
    let dir = tempdir().unwrap();
    let key = Grid2d.key(5, 9);
    {
        let cache = Arc::new(SharedCache::new(4).unwrap());
        let store = store_with_cache(dir.path(), cache);
        store.put(&key, b"durable").unwrap();
        store.flush().unwrap();
        store.close().unwrap();
    }

    let cache = Arc::new(SharedCache::new(4).unwrap());
    let store = store_with_cache(dir.path(), cache);

    assert_eq!(store.get(&key, false).unwrap().unwrap(), b"durable");
}
