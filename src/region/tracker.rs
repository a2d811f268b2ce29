//! # Free-Sector Tracking
//!
//! `SectorTracker` keeps one bit per sector of a region file ("used") and
//! decides where a (re)written entry lands. The policy favors stability
//! over packing:
//!
//! 1. Shrinking in place: a smaller entry keeps its offset, trailing
//!    sectors are freed.
//! 2. Growing in place: if the sectors immediately after the entry's
//!    current run are free, the entry keeps its offset.
//! 3. Otherwise first-fit: the lowest run of enough consecutive free
//!    sectors, scanning from sector 1 (sector 0 is header, permanently
//!    used).
//!
//! Freed ranges are reused opportunistically; there is no compaction.
//!
//! The bitmap is rebuilt at open from the sector map: header sectors are
//! marked used, then every non-special entry's range. Registered special
//! words are not locations and contribute no range.

use eyre::Result;

use crate::config::MAX_SECTOR_OFFSET;
use crate::error::UnsupportedData;

use super::{PackedSectorMap, SectorLocation};

/// Growable bitmap over sector indices. Bits beyond the allocated blocks
/// read as free.
#[derive(Debug, Default)]
pub struct SectorBitmap {
    blocks: Vec<u64>,
}

impl SectorBitmap {
    pub fn with_capacity(bits: u64) -> Self {
        Self {
            blocks: vec![0; (bits.div_ceil(64)) as usize],
        }
    }

    pub fn get(&self, bit: u64) -> bool {
        match self.blocks.get((bit / 64) as usize) {
            Some(block) => block & (1 << (bit % 64)) != 0,
            None => false,
        }
    }

    pub fn set(&mut self, bit: u64) {
        let block = (bit / 64) as usize;
        if block >= self.blocks.len() {
            self.blocks.resize(block + 1, 0);
        }
        self.blocks[block] |= 1 << (bit % 64);
    }

    pub fn clear(&mut self, bit: u64) {
        if let Some(block) = self.blocks.get_mut((bit / 64) as usize) {
            *block &= !(1 << (bit % 64));
        }
    }

    pub fn set_range(&mut self, start: u64, len: u64) {
        for bit in start..start + len {
            self.set(bit);
        }
    }

    pub fn clear_range(&mut self, start: u64, len: u64) {
        for bit in start..start + len {
            self.clear(bit);
        }
    }
}

/// Free-sector bitmap plus the allocation policy.
pub struct SectorTracker {
    used: SectorBitmap,
}

impl SectorTracker {
    /// Rebuilds the used-sector state for an opened region: header sectors
    /// permanently used, then every non-special mapped range.
    pub fn from_map(map: &PackedSectorMap, header_sectors: u64, file_sectors: u64) -> Self {
        let mut used = SectorBitmap::with_capacity(file_sectors.max(header_sectors));
        used.set_range(0, header_sectors);
        for (_, location) in map.iter_present() {
            if !map.is_special(location) {
                used.set_range(location.offset() as u64, location.size() as u64);
            }
        }
        Self { used }
    }

    pub fn is_free(&self, sector: u64) -> bool {
        !self.used.get(sector)
    }

    /// Picks the location for an entry of `want` sectors currently stored
    /// at `old` (if anywhere), without modifying the bitmap. Callers pass
    /// `want >= 1`.
    pub fn find(&self, old: Option<SectorLocation>, want: u32) -> Result<SectorLocation> {
        debug_assert!(want >= 1, "zero-sector reservations are not allocated here");

        if let Some(old) = old {
            if want <= old.size() {
                return Ok(old.with_size(want));
            }
            let tail = old.offset() as u64 + old.size() as u64;
            let grown_end = old.offset() as u64 + want as u64;
            if (tail..grown_end).all(|sector| self.is_free(sector)) {
                return Ok(old.with_size(want));
            }
        }

        let start = self.first_free_run(want);
        if start > MAX_SECTOR_OFFSET as u64 {
            return Err(UnsupportedData::new(
                format!("sector offset {start} exceeds the {MAX_SECTOR_OFFSET} maximum"),
                start,
            )
            .into());
        }
        Ok(SectorLocation::new(start as u32, want))
    }

    /// Lowest run of `want` consecutive free sectors at or above sector 1.
    fn first_free_run(&self, want: u32) -> u64 {
        let mut run_start = 1u64;
        let mut run_len = 0u32;
        let mut sector = 1u64;
        loop {
            if self.is_free(sector) {
                if run_len == 0 {
                    run_start = sector;
                }
                run_len += 1;
                if run_len == want {
                    return run_start;
                }
            } else {
                run_len = 0;
            }
            sector += 1;
        }
    }

    /// Applies a reservation: frees the old range and marks the new one.
    /// Overlapping ranges work; the new range wins.
    pub fn commit(&mut self, old: Option<SectorLocation>, new: SectorLocation) {
        if let Some(old) = old {
            self.used
                .clear_range(old.offset() as u64, old.size() as u64);
        }
        self.used.set_range(new.offset() as u64, new.size() as u64);
    }

    /// Frees an erased entry's range.
    pub fn release(&mut self, old: SectorLocation) {
        self.used
            .clear_range(old.offset() as u64, old.size() as u64);
    }
}
