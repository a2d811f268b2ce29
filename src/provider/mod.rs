//! # Region Providers
//!
//! A [`RegionProvider`] hands out exclusive access to regions by key. The
//! store layer never holds a region directly; it runs closures inside a
//! provider, and the provider decides how regions are opened, cached and
//! closed:
//!
//! - [`SimpleRegionProvider`]: opens per call, closes after. The building
//!   block the caching providers wrap.
//! - [`CachedRegionProvider`]: a per-instance bounded LRU under one lock.
//! - [`SharedCachedRegionProvider`]: delegates to a process-wide
//!   [`SharedCache`] keyed by `(region, factory)`, so distinct stores can
//!   share one bounded pool of open files.
//!
//! A [`RegionFactory`] is the provider's source of regions: it opens (or
//! declines to open) a region for a key and enumerates the regions that
//! exist on disk.

mod cached;
mod shared;
mod simple;

pub use cached::CachedRegionProvider;
pub use shared::{SharedCache, SharedCachedRegionProvider};
pub use simple::{ExtRegionFactory, SimpleRegionFactory, SimpleRegionProvider};

use eyre::Result;

use crate::key::RegionKey;
use crate::region::Region;

/// Lazily enumerated region keys. Dropping the iterator releases the
/// underlying directory handle.
pub type RegionKeys = Box<dyn Iterator<Item = Result<RegionKey>> + Send>;

/// Opens regions on demand and enumerates the existing ones.
pub trait RegionFactory: Send + Sync {
    /// Opens the region, creating its backing storage if absent.
    fn get_region(&self, region: &RegionKey) -> Result<Box<dyn Region>>;

    /// Opens the region only if its backing storage already exists.
    fn get_existing_region(&self, region: &RegionKey) -> Result<Option<Box<dyn Region>>>;

    /// Region keys with existing backing storage.
    fn all_regions(&self) -> Result<RegionKeys>;
}

/// Exclusive, scoped access to regions.
pub trait RegionProvider: Send + Sync {
    /// Runs `f` on the region for `region`, creating it if missing. The
    /// region is exclusively held for the duration of the call.
    fn for_region(
        &self,
        region: &RegionKey,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<()>;

    /// Like [`Self::for_region`] but never creates; returns whether a
    /// region existed and `f` ran.
    fn for_existing_region(
        &self,
        region: &RegionKey,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<bool>;

    /// Region keys with existing backing storage.
    fn all_regions(&self) -> Result<RegionKeys>;

    /// Flushes any open regions.
    fn flush(&self) -> Result<()>;

    /// Closes the provider; subsequent calls fail with `AlreadyClosed`.
    fn close(&self) -> Result<()>;
}
