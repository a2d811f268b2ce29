//! # Per-Instance Region Cache
//!
//! `CachedRegionProvider` keeps up to `max_open` regions open in a small
//! LRU behind one mutex. All access is serialized through that lock, which
//! also is what gives callers exclusive use of a region; it suits stores
//! accessed from one thread or with little region locality contention.
//! For a cache shared between stores and threads, use
//! [`SharedCachedRegionProvider`](super::SharedCachedRegionProvider).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::AlreadyClosed;
use crate::key::RegionKey;
use crate::region::Region;

use super::{RegionFactory, RegionKeys, RegionProvider};

struct CachedRegions {
    map: HashMap<RegionKey, Box<dyn Region>>,
    recency: VecDeque<RegionKey>,
}

pub struct CachedRegionProvider {
    factory: Arc<dyn RegionFactory>,
    max_open: usize,
    inner: Mutex<CachedRegions>,
    closed: AtomicBool,
}

impl CachedRegionProvider {
    pub fn new(factory: Arc<dyn RegionFactory>, max_open: usize) -> Self {
        Self {
            factory,
            max_open: max_open.max(1),
            inner: Mutex::new(CachedRegions {
                map: HashMap::new(),
                recency: VecDeque::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AlreadyClosed.into());
        }
        Ok(())
    }

    fn touch(inner: &mut CachedRegions, region: &RegionKey) {
        inner.recency.retain(|k| k != region);
        inner.recency.push_back(region.clone());
    }

    fn evict_over_capacity(&self, inner: &mut CachedRegions) -> Result<()> {
        while inner.map.len() > self.max_open {
            let oldest = match inner.recency.pop_front() {
                Some(oldest) => oldest,
                None => break,
            };
            if let Some(mut evicted) = inner.map.remove(&oldest) {
                debug!(region = %oldest, "evicting region from local cache");
                evicted.close()?;
            }
        }
        Ok(())
    }
}

impl RegionProvider for CachedRegionProvider {
    fn for_region(
        &self,
        region: &RegionKey,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<()> {
        self.check_open()?;
        let mut inner = self.inner.lock();
        if !inner.map.contains_key(region) {
            let opened = self.factory.get_region(region)?;
            inner.map.insert(region.clone(), opened);
        }
        Self::touch(&mut inner, region);
        // INVARIANT: inserted above if missing
        f(inner.map.get_mut(region).expect("region was just cached").as_mut())?;
        self.evict_over_capacity(&mut inner)
    }

    fn for_existing_region(
        &self,
        region: &RegionKey,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<bool> {
        self.check_open()?;
        let mut inner = self.inner.lock();
        if !inner.map.contains_key(region) {
            match self.factory.get_existing_region(region)? {
                Some(opened) => {
                    inner.map.insert(region.clone(), opened);
                }
                None => return Ok(false),
            }
        }
        Self::touch(&mut inner, region);
        // INVARIANT: inserted above if missing
        f(inner.map.get_mut(region).expect("region was just cached").as_mut())?;
        self.evict_over_capacity(&mut inner)?;
        Ok(true)
    }

    fn all_regions(&self) -> Result<RegionKeys> {
        self.check_open()?;
        self.factory.all_regions()
    }

    fn flush(&self) -> Result<()> {
        self.check_open()?;
        let mut inner = self.inner.lock();
        for region in inner.map.values_mut() {
            region.flush()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.check_open()?;
        self.closed.store(true, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.recency.clear();
        let mut first_error = None;
        for (key, mut region) in inner.map.drain() {
            if let Err(err) = region.close() {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::warn!(region = %key, error = %err, "suppressed close error");
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
