//! # Region Storage
//!
//! This module implements the on-disk region format and its runtime. A
//! region is a fixed-capacity bucket of entries persisted as one file,
//! divided into fixed-size sectors:
//!
//! ```text
//! +--------------------------+
//! | Header sectors           |  packed sector map column (4 B/id, BE),
//! |                          |  then extra header columns in order
//! +--------------------------+
//! | Data sectors             |  per entry: u32 BE length, payload,
//! |                          |  zero padding to the sector boundary
//! +--------------------------+
//! ```
//!
//! An entry's location is a packed 32-bit word: the upper 24 bits are the
//! starting sector, the low 8 bits the sector count. Word zero means
//! "absent". Sector 0 always belongs to the header, so offset 0 can never
//! be a valid data location.
//!
//! ## Module Organization
//!
//! - `storage`: memory-mapped sector file (`SectorStorage`)
//! - `sector_map`: the packed id -> location table (`PackedSectorMap`)
//! - `tracker`: free-sector bitmap and allocation policy (`SectorTracker`)
//! - `header`: extra fixed-width header columns (`HeaderProvider`)
//! - `file`: the inline tier (`RegionFile`)
//! - `ext`: the sidecar tier for oversized entries (`ExtRegion`)
//!
//! ## The Two Tiers
//!
//! [`RegionFile`] holds entries inline; an entry may span at most 255
//! sectors. [`ExtRegion`] stores each oversized entry as its own file in a
//! `<region>.ext/` sidecar directory with an atomic replace discipline.
//! Both implement the object-safe [`Region`] trait, which is what the
//! provider and cache layers operate on.
//!
//! ## Concurrency
//!
//! A region instance is not internally synchronized; all operations take
//! `&mut self` and callers serialize access per region (the shared cache's
//! per-key lock, or a provider's own lock). Inline writes are not atomic:
//! the header and payload are separate writes, and durability requires
//! `flush`. Sidecar writes are atomic via temp file + rename.

mod ext;
mod file;
mod header;
mod sector_map;
mod storage;
mod tracker;

pub use ext::{ExtRegion, EXT_DIR_SUFFIX};
pub use file::{RegionFile, RegionFileBuilder};
pub use header::{HeaderProvider, TimestampHeaderProvider, TimestampResolution};
pub use sector_map::{
    ConflictHandler, PackedSectorMap, SectorLocation, SpecialReader, SpecialSectorEntry,
};
pub use storage::SectorStorage;
pub use tracker::{SectorBitmap, SectorTracker};

use eyre::Result;
use hashbrown::HashMap;

use crate::error::{MultiUnsupportedData, UnsupportedData};
use crate::key::{EntryKey, RegionKey};

/// One open region, inline or sidecar. Object safe so the cache and
/// provider layers can hold either tier behind the same handle.
///
/// Implementations are exclusive-access: the caller holds the region's
/// cache slot (or provider lock) for the duration of every call.
pub trait Region: Send {
    /// The region this instance persists.
    fn region_key(&self) -> &RegionKey;

    /// Writes `Some(bytes)` at the key, or erases the key with `None`.
    /// Erasing unlinks the entry; the payload bytes are not overwritten.
    fn write(&mut self, key: &EntryKey, value: Option<&[u8]>) -> Result<()>;

    /// Erases the key, then records the registered special marker in its
    /// sector-map slot. Fails if the marker is not registered.
    fn write_special(&mut self, key: &EntryKey, marker: &str) -> Result<()>;

    /// Reads the payload at the key, if present.
    fn read(&mut self, key: &EntryKey) -> Result<Option<Vec<u8>>>;

    /// Whether anything (normal or special) is stored at the key.
    fn has(&mut self, key: &EntryKey) -> Result<bool>;

    /// Calls `f` for every present key, in ascending id order.
    fn for_each_key(&mut self, f: &mut dyn FnMut(EntryKey) -> Result<()>) -> Result<()>;

    /// Makes previous writes durable.
    fn flush(&mut self) -> Result<()>;

    /// Flushes and releases the region's resources. The instance must not
    /// be used afterwards.
    fn close(&mut self) -> Result<()>;

    /// Writes a batch of entries. Per-key [`UnsupportedData`] rejections
    /// are collected into one [`MultiUnsupportedData`]; any other error
    /// aborts the batch immediately.
    fn write_many(&mut self, entries: &[(&EntryKey, Option<&[u8]>)]) -> Result<()> {
        let mut rejected: HashMap<EntryKey, UnsupportedData> = HashMap::new();
        for (key, value) in entries {
            if let Err(report) = self.write(key, *value) {
                match report.downcast::<UnsupportedData>() {
                    Ok(unsupported) => {
                        rejected.insert((*key).clone(), unsupported);
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(MultiUnsupportedData::new(rejected).into())
        }
    }
}
