//! # Shared Region Cache
//!
//! `SharedCache` is a process-wide bounded pool of open regions, shared by
//! every [`SharedCachedRegionProvider`] pointed at it. Entries are keyed
//! by `(region key, factory identity)` so two stores over different
//! directories (or different tiers of one store) never collide even when
//! their region names match.
//!
//! ## Admission and Eviction
//!
//! The cache operates on a hard and a soft limit. An atomic *ticket*
//! counter with `max_size` permits is the source of truth for how many
//! regions are open: opening takes a ticket, closing returns it. Once the
//! population crosses the soft threshold, the thread that opened the
//! region runs a *lazy* cleanup (skipped if one is already running) that
//! closes roughly the older half of the entries by insertion rank. Only
//! when no ticket is available at all does a thread block: it runs a
//! *forced* cleanup (waiting for a running one to finish) and retries.
//!
//! Insertion rank stands in for recency. It is approximate LRU, but it
//! avoids touching shared state on every access, and halving the
//! population per cleanup amortizes the close cost.
//!
//! ## Exclusion
//!
//! Each entry carries its own mutex; holding it is what makes region
//! operations exclusive per key. The key map itself is lock-sharded so
//! unrelated regions rarely contend. Shard locks are never held while a
//! region lock is taken, and cleanup closes a region under its entry lock
//! before unlinking the entry, so a racing lookup either finds the live
//! region or observes the tombstone and retries.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use eyre::{ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{
    CACHE_SHARD_COUNT, DEFAULT_SHARED_CACHE_SIZE, MIN_SHARED_CACHE_SIZE, SHARED_CACHE_SIZE_ENV,
};
use crate::error::AlreadyClosed;
use crate::key::RegionKey;
use crate::region::Region;

use super::{RegionFactory, RegionKeys, RegionProvider};

#[derive(Clone)]
struct SharedCacheKey {
    region: RegionKey,
    factory: Arc<dyn RegionFactory>,
}

impl SharedCacheKey {
    fn factory_identity(&self) -> usize {
        Arc::as_ptr(&self.factory) as *const () as usize
    }
}

impl PartialEq for SharedCacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region && self.factory_identity() == other.factory_identity()
    }
}

impl Eq for SharedCacheKey {}

impl std::hash::Hash for SharedCacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.region.hash(state);
        self.factory_identity().hash(state);
    }
}

#[derive(Clone)]
struct CacheEntry {
    region: Arc<Mutex<Option<Box<dyn Region>>>>,
    opened: u64,
}

type Shard = Mutex<HashMap<SharedCacheKey, CacheEntry>>;

pub struct SharedCache {
    max_size: usize,
    soft_threshold: usize,
    shards: Vec<Shard>,
    /// Remaining admission permits; `max_size - tickets` regions are open.
    tickets: AtomicUsize,
    cleanup_running: Mutex<()>,
    open_counter: AtomicU64,
}

impl SharedCache {
    pub fn new(max_size: usize) -> Result<Self> {
        ensure!(
            max_size >= MIN_SHARED_CACHE_SIZE,
            "shared cache capacity must be at least {MIN_SHARED_CACHE_SIZE}"
        );

        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let slack = (max_size >> 3).clamp(1, 2 * cores);
        let soft_threshold = max_size.saturating_sub(slack).max(1);

        Ok(Self {
            max_size,
            soft_threshold,
            shards: (0..CACHE_SHARD_COUNT)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            tickets: AtomicUsize::new(max_size),
            cleanup_running: Mutex::new(()),
            open_counter: AtomicU64::new(0),
        })
    }

    /// The process-wide default instance, sized by the
    /// `REGIONKV_SHARED_CACHE_SIZE` environment variable.
    pub fn global() -> Arc<SharedCache> {
        static GLOBAL: OnceLock<Arc<SharedCache>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let size = std::env::var(SHARED_CACHE_SIZE_ENV)
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(DEFAULT_SHARED_CACHE_SIZE)
                    .max(MIN_SHARED_CACHE_SIZE);
                // INVARIANT: size was clamped to the minimum above
                Arc::new(SharedCache::new(size).expect("clamped capacity is valid"))
            })
            .clone()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of regions currently cached.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: &SharedCacheKey) -> &Shard {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % CACHE_SHARD_COUNT]
    }

    fn try_acquire_ticket(&self) -> bool {
        self.tickets
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn release_ticket(&self) {
        self.tickets.fetch_add(1, Ordering::AcqRel);
    }

    /// Runs `f` on the region for `region_key` opened through `factory`.
    /// Returns whether `f` ran; `false` only when `allow_create` is false
    /// and the region does not exist.
    pub fn for_region(
        &self,
        region_key: &RegionKey,
        factory: &Arc<dyn RegionFactory>,
        allow_create: bool,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<bool> {
        let key = SharedCacheKey {
            region: region_key.clone(),
            factory: Arc::clone(factory),
        };

        loop {
            let mut opened_fresh = false;
            let entry = {
                let mut shard = self.shard(&key).lock();
                match shard.get(&key) {
                    Some(entry) => entry.clone(),
                    None => {
                        if !self.try_acquire_ticket() {
                            // cache is completely full: run a blocking
                            // cleanup and retry from the lookup
                            drop(shard);
                            self.cleanup(true, false)?;
                            continue;
                        }
                        let opened = if allow_create {
                            factory.get_region(region_key)
                        } else {
                            match factory.get_existing_region(region_key) {
                                Ok(Some(region)) => Ok(region),
                                Ok(None) => {
                                    self.release_ticket();
                                    return Ok(false);
                                }
                                Err(err) => Err(err),
                            }
                        };
                        let opened = match opened {
                            Ok(region) => region,
                            Err(err) => {
                                self.release_ticket();
                                return Err(err);
                            }
                        };
                        let entry = CacheEntry {
                            region: Arc::new(Mutex::new(Some(opened))),
                            opened: self.open_counter.fetch_add(1, Ordering::AcqRel),
                        };
                        shard.insert(key.clone(), entry.clone());
                        opened_fresh = true;
                        entry
                    }
                }
            };

            let mut guard = entry.region.lock();
            match guard.as_mut() {
                None => {
                    // the entry was closed between lookup and lock; its
                    // tombstone is about to be unlinked
                    drop(guard);
                    std::thread::yield_now();
                    continue;
                }
                Some(region) => {
                    let result = f(region.as_mut());
                    drop(guard);
                    result?;
                    if opened_fresh {
                        self.cleanup(false, false)?;
                    }
                    return Ok(true);
                }
            }
        }
    }

    /// Closes expired entries. `force` waits for a running cleanup instead
    /// of skipping, and ignores the soft threshold; `full` expires
    /// everything. Close errors are logged and the first one is returned
    /// after all entries were processed.
    fn cleanup(&self, force: bool, full: bool) -> Result<bool> {
        let available = self.tickets.load(Ordering::Acquire);
        let used = self.max_size - available.min(self.max_size);

        let _running = if force {
            self.cleanup_running.lock()
        } else {
            if full && used == 0 {
                return Ok(false);
            }
            if !full && used < self.soft_threshold {
                return Ok(false);
            }
            match self.cleanup_running.try_lock() {
                Some(guard) => guard,
                None => return Ok(false),
            }
        };

        let expiration = if full {
            u64::MAX
        } else {
            self.open_counter
                .load(Ordering::Acquire)
                .saturating_sub((used / 2) as u64)
        };

        let mut closed = 0usize;
        let mut first_error: Option<eyre::Report> = None;
        for shard in &self.shards {
            let expired: Vec<(SharedCacheKey, CacheEntry)> = shard
                .lock()
                .iter()
                .filter(|(_, entry)| entry.opened <= expiration)
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect();

            for (key, entry) in expired {
                {
                    let mut guard = entry.region.lock();
                    if let Some(mut region) = guard.take() {
                        if let Err(err) = region.close() {
                            if first_error.is_none() {
                                first_error = Some(err);
                            } else {
                                warn!(region = %key.region, error = %err, "suppressed close error during cleanup");
                            }
                        }
                        self.release_ticket();
                        closed += 1;
                    }
                }
                let mut shard_guard = shard.lock();
                if let Some(current) = shard_guard.get(&key) {
                    if Arc::ptr_eq(&current.region, &entry.region) {
                        shard_guard.remove(&key);
                    }
                }
            }
        }

        if closed > 0 {
            debug!(closed, full, force, "shared cache cleanup");
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    /// Flushes every cached region in place.
    pub fn flush(&self) -> Result<()> {
        for shard in &self.shards {
            let entries: Vec<CacheEntry> = shard.lock().values().cloned().collect();
            for entry in entries {
                let mut guard = entry.region.lock();
                if let Some(region) = guard.as_mut() {
                    region.flush()?;
                }
            }
        }
        Ok(())
    }

    /// Closes every cached region.
    pub fn close(&self) -> Result<()> {
        self.cleanup(true, true).map(|_| ())
    }
}

/// Provider over a [`SharedCache`]. Every method funnels through
/// [`SharedCache::for_region`] with this provider's factory.
pub struct SharedCachedRegionProvider {
    cache: Arc<SharedCache>,
    factory: Arc<dyn RegionFactory>,
    closed: AtomicBool,
}

impl SharedCachedRegionProvider {
    /// Provider over the process-wide default cache.
    pub fn new(factory: Arc<dyn RegionFactory>) -> Self {
        Self::with_cache(factory, SharedCache::global())
    }

    pub fn with_cache(factory: Arc<dyn RegionFactory>, cache: Arc<SharedCache>) -> Self {
        Self {
            cache,
            factory,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AlreadyClosed.into());
        }
        Ok(())
    }
}

impl RegionProvider for SharedCachedRegionProvider {
    fn for_region(
        &self,
        region: &RegionKey,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<()> {
        self.check_open()?;
        self.cache.for_region(region, &self.factory, true, f)?;
        Ok(())
    }

    fn for_existing_region(
        &self,
        region: &RegionKey,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<bool> {
        self.check_open()?;
        self.cache.for_region(region, &self.factory, false, f)
    }

    fn all_regions(&self) -> Result<RegionKeys> {
        self.check_open()?;
        self.factory.all_regions()
    }

    fn flush(&self) -> Result<()> {
        self.check_open()?;
        self.cache.flush()
    }

    fn close(&self) -> Result<()> {
        self.check_open()?;
        self.closed.store(true, Ordering::Release);
        self.cache.close()
    }
}
