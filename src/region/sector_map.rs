//! # Packed Sector Map
//!
//! The sector map is the first header column of a region file: one 32-bit
//! big-endian word per entry id. A word packs the entry's location as
//!
//! ```text
//! bit 31                8 7        0
//! +----------------------+----------+
//! |  offset (24 bits)    | size (8) |
//! +----------------------+----------+
//! ```
//!
//! with offset and size both counted in sectors. The all-zero word means
//! "absent" (offset 0 is inside the header, so no real entry can produce
//! it). The bit layout is identical on every platform.
//!
//! ## Special Entries
//!
//! A region may register *special* entries: reserved raw word values that
//! do not describe a data location. A special entry carries a marker token
//! (to request it on write), a reader producing a synthetic payload, and a
//! conflict handler invoked when a normal allocation happens to pack to
//! the same raw value.

use std::sync::Arc;

use eyre::{bail, Result};
use zerocopy::big_endian::U32;
use zerocopy::FromBytes;

use crate::config::{MAX_ENTRY_SECTORS, MAX_SECTOR_OFFSET, SECTOR_MAP_ENTRY_SIZE};
use crate::error::UnsupportedData;
use crate::key::EntryKey;

use super::SectorStorage;

/// Location of an inline entry, in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorLocation {
    offset: u32,
    size: u32,
}

impl SectorLocation {
    pub fn new(offset: u32, size: u32) -> Self {
        debug_assert!(offset <= MAX_SECTOR_OFFSET);
        debug_assert!(size <= MAX_ENTRY_SECTORS);
        Self { offset, size }
    }

    /// Starting sector.
    pub fn offset(self) -> u32 {
        self.offset
    }

    /// Sector count.
    pub fn size(self) -> u32 {
        self.size
    }

    /// Same offset, different size.
    pub fn with_size(self, size: u32) -> Self {
        Self::new(self.offset, size)
    }

    /// The packed word for this location.
    pub fn packed(self) -> u32 {
        (self.offset << 8) | self.size
    }

    /// Decodes a packed word. Any word decodes; whether it is a real
    /// location or a registered special value is the map's business.
    pub fn unpack(word: u32) -> Self {
        Self {
            offset: word >> 8,
            size: word & 0xFF,
        }
    }
}

/// Produces the synthetic payload of a special entry.
pub type SpecialReader = Arc<dyn Fn(&EntryKey) -> Vec<u8> + Send + Sync>;

/// Invoked when a normal allocation packs to a registered special value,
/// after the map slot is set and before the payload write. The handler may
/// transform the payload so that the special reader reproduces it.
pub type ConflictHandler = Arc<dyn Fn(&EntryKey, &mut Vec<u8>) + Send + Sync>;

/// One registered special sector-map value.
#[derive(Clone)]
pub struct SpecialSectorEntry {
    marker: &'static str,
    raw: u32,
    reader: SpecialReader,
    on_conflict: ConflictHandler,
}

impl SpecialSectorEntry {
    pub fn new(
        marker: &'static str,
        raw: u32,
        reader: SpecialReader,
        on_conflict: ConflictHandler,
    ) -> Self {
        Self {
            marker,
            raw,
            reader,
            on_conflict,
        }
    }

    pub fn marker(&self) -> &'static str {
        self.marker
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }
}

impl std::fmt::Debug for SpecialSectorEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecialSectorEntry")
            .field("marker", &self.marker)
            .field("raw", &self.raw)
            .finish()
    }
}

/// In-memory mirror of the packed sector-map header column.
pub struct PackedSectorMap {
    words: Vec<u32>,
    specials: Vec<SpecialSectorEntry>,
}

impl PackedSectorMap {
    /// Reads the map column (the first `key_count` words of the header)
    /// from an opened sector file.
    pub fn read_from(
        storage: &SectorStorage,
        key_count: u32,
        specials: Vec<SpecialSectorEntry>,
    ) -> Result<Self> {
        let bytes = storage.bytes(0, key_count as usize * SECTOR_MAP_ENTRY_SIZE)?;
        let packed = <[U32]>::ref_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to read sector map column: {e:?}"))?;
        Ok(Self {
            words: packed.iter().map(|w| w.get()).collect(),
            specials,
        })
    }

    /// Fresh all-absent map, used by the sidecar-free unit tests.
    #[cfg(test)]
    pub fn empty(key_count: u32, specials: Vec<SpecialSectorEntry>) -> Self {
        Self {
            words: vec![0; key_count as usize],
            specials,
        }
    }

    pub fn key_count(&self) -> u32 {
        self.words.len() as u32
    }

    /// Raw packed word for `id`.
    pub fn raw(&self, id: u32) -> u32 {
        self.words[id as usize]
    }

    /// Location stored for `id`, if any. Registered special words decode
    /// like any other; use [`Self::is_special`] to tell them apart.
    pub fn get(&self, id: u32) -> Option<SectorLocation> {
        match self.words[id as usize] {
            0 => None,
            word => Some(SectorLocation::unpack(word)),
        }
    }

    /// Stores a location for `id`, validating the format bounds. Returns
    /// the conflict handler of a registered special entry when the packed
    /// word collides with its raw value.
    pub fn set(&mut self, id: u32, location: SectorLocation) -> Result<Option<ConflictHandler>> {
        if location.size() > MAX_ENTRY_SECTORS {
            return Err(UnsupportedData::new(
                format!(
                    "entry size {} exceeds the {} sector maximum",
                    location.size(),
                    MAX_ENTRY_SECTORS
                ),
                location.size() as u64,
            )
            .into());
        }
        if location.offset() > MAX_SECTOR_OFFSET {
            return Err(UnsupportedData::new(
                format!(
                    "sector offset {} exceeds the {} maximum",
                    location.offset(),
                    MAX_SECTOR_OFFSET
                ),
                location.offset() as u64,
            )
            .into());
        }

        let packed = location.packed();
        let handler = self
            .specials
            .iter()
            .find(|s| s.raw == packed)
            .map(|s| Arc::clone(&s.on_conflict));
        self.words[id as usize] = packed;
        Ok(handler)
    }

    /// Clears the slot for `id` back to "absent".
    pub fn clear(&mut self, id: u32) {
        self.words[id as usize] = 0;
    }

    /// Stores the raw value of the registered marker at `id`. Fails if the
    /// marker was never registered.
    pub fn set_special(&mut self, id: u32, marker: &str) -> Result<()> {
        match self.specials.iter().find(|s| s.marker == marker) {
            Some(special) => {
                self.words[id as usize] = special.raw;
                Ok(())
            }
            None => bail!("unknown special marker '{marker}'"),
        }
    }

    /// Whether a location packs to a registered special value.
    pub fn is_special(&self, location: SectorLocation) -> bool {
        self.is_special_word(location.packed())
    }

    pub fn is_special_word(&self, word: u32) -> bool {
        word != 0 && self.specials.iter().any(|s| s.raw == word)
    }

    /// The special reader for `id`, when its current word is a registered
    /// special value.
    pub fn special_reader(&self, id: u32) -> Option<&SpecialReader> {
        if self.specials.is_empty() {
            return None;
        }
        let word = self.words[id as usize];
        self.specials
            .iter()
            .find(|s| s.raw == word)
            .map(|s| &s.reader)
    }

    /// Iterates `(id, location)` over all non-zero slots in id order.
    pub fn iter_present(&self) -> impl Iterator<Item = (u32, SectorLocation)> + '_ {
        self.words
            .iter()
            .enumerate()
            .filter(|(_, &word)| word != 0)
            .map(|(id, &word)| (id as u32, SectorLocation::unpack(word)))
    }
}
