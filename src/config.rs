//! # Configuration Constants
//!
//! This module centralizes the crate's configuration constants, grouping
//! interdependent values together so that changing one makes the dependent
//! ones visible.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_SECTOR_SIZE (512 bytes)
//!       │
//!       ├─> Inline entry capacity: MAX_ENTRY_SECTORS * sector_size - 4
//!       │     (255 * 512 - 4 = 130,556 bytes with the default sector size;
//!       │      larger values spill into the .ext sidecar tier)
//!       │
//!       └─> ANVIL_SECTOR_SIZE (4096) is the same format with bigger sectors
//!
//! SECTOR_MAP_ENTRY_SIZE (4 bytes)
//!       │
//!       └─> Header stride = 4 + sum of extra header provider widths.
//!           The packed sector-map column always comes first.
//!
//! MAX_ENTRY_SECTORS (255) and MAX_SECTOR_OFFSET (2^24 - 1)
//!       │
//!       └─> Fixed by the packed sector word layout: low 8 bits hold the
//!           size in sectors, the upper 24 bits hold the starting sector.
//!           These are format maxima, not tunables.
//!
//! DEFAULT_SHARED_CACHE_SIZE (256)
//!       │
//!       ├─> Hard cap on open region files in the process-wide cache
//!       │
//!       └─> Soft cleanup threshold is derived per cache instance:
//!           max_size - clamp(max_size / 8, 1, 2 * cores)
//!
//! CACHE_SHARD_COUNT (16)
//!       │
//!       └─> Lock shards of the shared cache key map. Entries are few
//!           (at most DEFAULT_SHARED_CACHE_SIZE), so a modest count is
//!           enough to keep unrelated regions from contending.
//! ```
//!
//! ## Environment
//!
//! `REGIONKV_SHARED_CACHE_SIZE` overrides the capacity of the process-wide
//! default cache returned by `SharedCache::global()`. Values below
//! `MIN_SHARED_CACHE_SIZE` are clamped up.

/// Default sector size for inline region files, in bytes.
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Sector size used by the Anvil-compatible region format.
pub const ANVIL_SECTOR_SIZE: usize = 4096;

/// Width of one packed sector-map header entry.
pub const SECTOR_MAP_ENTRY_SIZE: usize = 4;

/// Maximum entry size in sectors, fixed by the 8 size bits of the packed word.
pub const MAX_ENTRY_SECTORS: u32 = (1 << 8) - 1;

/// Maximum starting sector, fixed by the 24 offset bits of the packed word.
pub const MAX_SECTOR_OFFSET: u32 = (1 << 24) - 1;

/// Lock shards of the shared region cache.
pub const CACHE_SHARD_COUNT: usize = 16;

/// Capacity of the process-wide default shared cache.
pub const DEFAULT_SHARED_CACHE_SIZE: usize = 256;

/// A shared cache must be able to hold at least two regions, otherwise a
/// single fallback chain (inline + ext) could evict its own working set on
/// every access.
pub const MIN_SHARED_CACHE_SIZE: usize = 2;

/// Environment variable overriding the default shared cache capacity.
pub const SHARED_CACHE_SIZE_ENV: &str = "REGIONKV_SHARED_CACHE_SIZE";

/// Default capacity of the per-instance LRU region provider.
pub const DEFAULT_LOCAL_CACHE_SIZE: usize = 128;

const _: () = assert!(MAX_ENTRY_SECTORS == 255);
const _: () = assert!(MAX_SECTOR_OFFSET == 0x00FF_FFFF);
const _: () = assert!(MIN_SHARED_CACHE_SIZE >= 2);
