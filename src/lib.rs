//! # regionkv - Region-File Key-Value Store
//!
//! regionkv is an embeddable key-value storage engine for values addressed
//! by spatially-clustered keys (the archetype: chunk coordinates in a
//! voxel world). Keys group into fixed-capacity buckets called *regions*;
//! each region persists as a single append-friendly file, amortizing seek
//! cost for clustered access.
//!
//! ## Quick Start
//!
//! ```ignore
//! use regionkv::SpatialStore;
//!
//! let store = SpatialStore::open("./world")?;
//! store.put_3d(12, 3, -7, &chunk_bytes)?;
//! let restored = store.get_3d(12, 3, -7)?;
//! store.flush()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │  Façades (SpatialStore, AnvilStore)   │
//! ├───────────────────────────────────────┤
//! │  RegionStore (ordered fallback chain) │
//! ├───────────────────────────────────────┤
//! │  Providers (simple / LRU / shared     │
//! │  cache with per-region exclusion)     │
//! ├───────────────────┬───────────────────┤
//! │  RegionFile       │  ExtRegion        │
//! │  (inline sectors) │  (.ext sidecars)  │
//! ├───────────────────┴───────────────────┤
//! │  Sector map · free bitmap · mmap I/O  │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! world/
//! ├── region2d/
//! │   ├── 0.0.2dr              # inline 2D region (1024 entries)
//! │   └── 0.0.2dr.ext/         # sidecar for oversized entries
//! │       └── 513              # one file per oversized id
//! └── region3d/
//!     └── 0.0.0.3dr            # inline 3D region (32768 entries)
//! ```
//!
//! A region file starts with header sectors: the packed sector-map column
//! (4 bytes per id, big-endian `offset << 8 | size`), then any extra
//! header columns such as last-modified timestamps. Data sectors follow;
//! an entry is a big-endian `u32` length plus payload, zero-padded to its
//! sector range. The format maxima (255 sectors per entry, 2^24 sectors
//! per file) come from the packed word layout.
//!
//! ## Dual Storage
//!
//! Values that exceed the inline capacity divert to a sidecar directory,
//! one file per id, replaced atomically via temp file + rename. The store
//! keeps at most one tier holding any key, so reads take the first hit.
//!
//! ## Caching and Concurrency
//!
//! Open region files are pooled in a process-wide [`SharedCache`] with a
//! hard capacity (ticket-counted), a soft cleanup threshold, and
//! per-region exclusive access. Two threads may operate on different
//! regions concurrently; operations on one region are serialized. Inline
//! durability requires [`RegionStore::flush`]; sidecar writes are
//! always atomic and synced.
//!
//! ## Module Overview
//!
//! - [`key`]: region/entry keys and the coordinate models
//! - [`region`]: the on-disk format and both storage tiers
//! - [`provider`]: region lifecycle (factories, caches, exclusion)
//! - [`store`]: the put/get façade with tiered fallback
//! - [`error`]: the typed error values carried inside `eyre::Report`

pub mod config;
pub mod error;
pub mod key;
pub mod provider;
pub mod region;
pub mod store;

pub use error::{
    AlreadyClosed, CorruptedData, InvalidKey, MultiUnsupportedData, StorageError, UnsupportedData,
};
pub use key::{EntryKey, Grid2d, Grid3d, KeyModel, McAnvil, RegionKey};
pub use provider::{
    CachedRegionProvider, ExtRegionFactory, RegionFactory, RegionProvider, SharedCache,
    SharedCachedRegionProvider, SimpleRegionFactory, SimpleRegionProvider,
};
pub use region::{
    ExtRegion, HeaderProvider, Region, RegionFile, RegionFileBuilder, SectorLocation,
    SpecialSectorEntry, TimestampHeaderProvider, TimestampResolution,
};
pub use store::{AnvilStore, RegionStore, SpatialStore};
