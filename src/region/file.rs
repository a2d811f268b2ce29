//! # Inline Region File
//!
//! `RegionFile` is the inline storage tier: header sectors first (packed
//! sector map column, then any extra header columns), data sectors after.
//! An entry is written as a big-endian `u32` length followed by the
//! payload, zero-padded to its reserved sector range.
//!
//! Writes are not atomic per entry: the header word and the payload are
//! separate stores into the mapping, and durability requires [`flush`].
//! Erasing only unlinks the entry; dead payload bytes stay on disk until a
//! later allocation reuses their sectors.
//!
//! [`flush`]: RegionFile::flush

use std::borrow::Cow;
use std::path::PathBuf;

use eyre::{ensure, eyre, Result};
use tracing::trace;

use crate::config::{DEFAULT_SECTOR_SIZE, MAX_ENTRY_SECTORS, MAX_SECTOR_OFFSET, SECTOR_MAP_ENTRY_SIZE};
use crate::error::{CorruptedData, InvalidKey, UnsupportedData};
use crate::key::{EntryKey, RegionKey};

use super::{
    HeaderProvider, PackedSectorMap, Region, SectorStorage, SectorTracker, SpecialSectorEntry,
    TimestampHeaderProvider, TimestampResolution,
};

/// Big-endian `u32` payload length stored ahead of every inline entry.
const LENGTH_PREFIX: usize = 4;

pub struct RegionFile {
    storage: SectorStorage,
    sector_map: PackedSectorMap,
    tracker: SectorTracker,
    extra_headers: Vec<Box<dyn HeaderProvider>>,
    region_key: RegionKey,
    key_count: u32,
    sector_size: usize,
}

impl RegionFile {
    pub fn builder() -> RegionFileBuilder {
        RegionFileBuilder::default()
    }

    pub fn region_key(&self) -> &RegionKey {
        &self.region_key
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Writes `bytes` at `key`, reusing or reallocating sectors as needed.
    pub fn write(&mut self, key: &EntryKey, bytes: &[u8]) -> Result<()> {
        let id = self.check_key(key)?;

        let inline_capacity = MAX_ENTRY_SECTORS as usize * self.sector_size;
        if bytes.len() + LENGTH_PREFIX > inline_capacity {
            return Err(UnsupportedData::new(
                format!(
                    "entry of {} bytes exceeds the inline capacity of {} bytes",
                    bytes.len(),
                    inline_capacity - LENGTH_PREFIX
                ),
                bytes.len() as u64,
            )
            .into());
        }

        let need = ((bytes.len() + LENGTH_PREFIX).div_ceil(self.sector_size)) as u32;
        let old = self.location_for_allocation(id);
        let location = self.tracker.find(old, need)?;
        let conflict = self.sector_map.set(id, location)?;
        self.tracker.commit(old, location);
        trace!(region = %self.region_key, id, offset = location.offset(), sectors = need, "reserved sectors");

        let mut payload = Cow::Borrowed(bytes);
        if let Some(handler) = conflict {
            let mut owned = payload.into_owned();
            handler(key, &mut owned);
            ensure!(
                owned.len() + LENGTH_PREFIX <= location.size() as usize * self.sector_size,
                "special-value conflict handler grew the payload past its reservation"
            );
            payload = Cow::Owned(owned);
        }

        let start = location.offset() as u64 * self.sector_size as u64;
        let reserved = location.size() as usize * self.sector_size;
        self.storage
            .grow(location.offset() as u64 + location.size() as u64)?;
        let slice = self.storage.bytes_mut(start, reserved)?;
        slice[..4].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        slice[4..4 + payload.len()].copy_from_slice(&payload);
        slice[4 + payload.len()..].fill(0);

        self.write_headers_for(key, id)
    }

    /// Erases the entry at `key`. The payload bytes are not overwritten;
    /// the data is dead once unreferenced.
    pub fn erase(&mut self, key: &EntryKey) -> Result<()> {
        let id = self.check_key(key)?;
        if let Some(old) = self.location_for_allocation(id) {
            self.tracker.release(old);
        }
        self.sector_map.clear(id);
        self.write_headers_for(key, id)
    }

    /// Erases the entry, then records the registered special marker.
    pub fn write_special(&mut self, key: &EntryKey, marker: &str) -> Result<()> {
        let id = self.check_key(key)?;
        let old = self.location_for_allocation(id);
        self.sector_map.set_special(id, marker)?;
        if let Some(old) = old {
            self.tracker.release(old);
        }
        self.write_headers_for(key, id)
    }

    /// Reads the payload at `key`: the synthetic value for a special
    /// entry, the stored bytes for a normal one, `None` when absent.
    pub fn read(&mut self, key: &EntryKey) -> Result<Option<Vec<u8>>> {
        let id = self.check_key(key)?;

        if let Some(reader) = self.sector_map.special_reader(id) {
            return Ok(Some(reader(key)));
        }

        let location = match self.sector_map.get(id) {
            Some(location) => location,
            None => return Ok(None),
        };

        let start = location.offset() as u64 * self.sector_size as u64;
        let reserved = location.size() as u64 * self.sector_size as u64;
        if start + 4 > self.storage.file_size() {
            return Err(CorruptedData {
                expected: self.storage.file_size(),
                found: start + 4,
            }
            .into());
        }
        if location.size() > 1 {
            self.storage
                .prefetch_sectors(location.offset() as u64, location.size() as u64);
        }

        let header = self.storage.bytes(start, 4)?;
        let len = u32::from_be_bytes(header.try_into().expect("slice is 4 bytes")) as u64;
        if len > reserved {
            return Err(CorruptedData {
                expected: reserved,
                found: len,
            }
            .into());
        }
        if start + 4 + len > self.storage.file_size() {
            return Err(CorruptedData {
                expected: self.storage.file_size(),
                found: start + 4 + len,
            }
            .into());
        }

        Ok(Some(self.storage.bytes(start + 4, len as usize)?.to_vec()))
    }

    /// Whether anything (normal or special) is stored at `key`.
    pub fn has(&mut self, key: &EntryKey) -> Result<bool> {
        let id = self.check_key(key)?;
        Ok(self.sector_map.raw(id) != 0)
    }

    /// Calls `f` for every present id, ascending.
    pub fn for_each_key(&mut self, f: &mut dyn FnMut(EntryKey) -> Result<()>) -> Result<()> {
        for id in 0..self.key_count {
            if self.sector_map.raw(id) != 0 {
                f(EntryKey::new(self.region_key.clone(), id))?;
            }
        }
        Ok(())
    }

    /// Syncs the mapping. The file length is kept sector-aligned
    /// structurally, so no padding pass is needed first.
    pub fn flush(&mut self) -> Result<()> {
        self.storage.sync()
    }

    /// Flushes; the file handle is released when the value is dropped.
    pub fn close(&mut self) -> Result<()> {
        self.flush()
    }

    /// The current word for `id` as an allocation input: a registered
    /// special word is not a sector range, so it reads as "nowhere".
    fn location_for_allocation(&self, id: u32) -> Option<super::SectorLocation> {
        let word = self.sector_map.raw(id);
        if word == 0 || self.sector_map.is_special_word(word) {
            return None;
        }
        self.sector_map.get(id)
    }

    fn check_key(&self, key: &EntryKey) -> Result<u32> {
        if key.region_key() != &self.region_key {
            return Err(InvalidKey(format!(
                "key {key} does not belong to region {}",
                self.region_key
            ))
            .into());
        }
        if key.id() >= self.key_count {
            return Err(InvalidKey(format!(
                "id {} out of range 0..{}",
                key.id(),
                self.key_count
            ))
            .into());
        }
        Ok(key.id())
    }

    /// Rewrites `id`'s entry in every header column: the packed sector-map
    /// word first, then each extra column. Each column's slice is written
    /// independently to keep partial writes bounded.
    fn write_headers_for(&mut self, key: &EntryKey, id: u32) -> Result<()> {
        let word = self.sector_map.raw(id);
        self.storage
            .bytes_mut(id as u64 * SECTOR_MAP_ENTRY_SIZE as u64, SECTOR_MAP_ENTRY_SIZE)?
            .copy_from_slice(&word.to_be_bytes());

        let mut column_base = self.key_count as u64 * SECTOR_MAP_ENTRY_SIZE as u64;
        for provider in &self.extra_headers {
            let width = provider.byte_count();
            let slice = self
                .storage
                .bytes_mut(column_base + id as u64 * width as u64, width)?;
            provider.write_entry(key, slice);
            column_base += self.key_count as u64 * width as u64;
        }
        Ok(())
    }
}

impl Region for RegionFile {
    fn region_key(&self) -> &RegionKey {
        &self.region_key
    }

    fn write(&mut self, key: &EntryKey, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(bytes) => RegionFile::write(self, key, bytes),
            None => self.erase(key),
        }
    }

    fn write_special(&mut self, key: &EntryKey, marker: &str) -> Result<()> {
        RegionFile::write_special(self, key, marker)
    }

    fn read(&mut self, key: &EntryKey) -> Result<Option<Vec<u8>>> {
        RegionFile::read(self, key)
    }

    fn has(&mut self, key: &EntryKey) -> Result<bool> {
        RegionFile::has(self, key)
    }

    fn for_each_key(&mut self, f: &mut dyn FnMut(EntryKey) -> Result<()>) -> Result<()> {
        RegionFile::for_each_key(self, f)
    }

    fn flush(&mut self) -> Result<()> {
        RegionFile::flush(self)
    }

    fn close(&mut self) -> Result<()> {
        RegionFile::close(self)
    }
}

/// Configures and opens a [`RegionFile`].
#[derive(Default)]
pub struct RegionFileBuilder {
    directory: Option<PathBuf>,
    region_key: Option<RegionKey>,
    key_count: Option<u32>,
    sector_size: Option<usize>,
    extra_headers: Vec<Box<dyn HeaderProvider>>,
    specials: Vec<SpecialSectorEntry>,
}

impl RegionFileBuilder {
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn region_key(mut self, region_key: RegionKey) -> Self {
        self.region_key = Some(region_key);
        self
    }

    pub fn key_count(mut self, key_count: u32) -> Self {
        self.key_count = Some(key_count);
        self
    }

    pub fn sector_size(mut self, sector_size: usize) -> Self {
        self.sector_size = Some(sector_size);
        self
    }

    pub fn add_header_provider(mut self, provider: Box<dyn HeaderProvider>) -> Self {
        self.extra_headers.push(provider);
        self
    }

    /// Adds the archetypal last-modified column.
    pub fn with_timestamps(self, resolution: TimestampResolution) -> Self {
        self.add_header_provider(Box::new(TimestampHeaderProvider::new(resolution)))
    }

    pub fn add_special_entry(mut self, entry: SpecialSectorEntry) -> Self {
        self.specials.push(entry);
        self
    }

    pub fn open(self) -> Result<RegionFile> {
        let directory = self
            .directory
            .ok_or_else(|| eyre!("region file builder requires a directory"))?;
        let region_key = self
            .region_key
            .ok_or_else(|| eyre!("region file builder requires a region key"))?;
        let key_count = self
            .key_count
            .ok_or_else(|| eyre!("region file builder requires a key count"))?;
        let sector_size = self.sector_size.unwrap_or(DEFAULT_SECTOR_SIZE);

        ensure!(key_count > 0, "a region holds at least one key");
        ensure!(
            key_count <= MAX_SECTOR_OFFSET + 1,
            "key count {key_count} exceeds the region format maximum"
        );

        let stride: usize = SECTOR_MAP_ENTRY_SIZE
            + self
                .extra_headers
                .iter()
                .map(|p| p.byte_count())
                .sum::<usize>();
        let header_bytes = key_count as u64 * stride as u64;
        let header_sectors = header_bytes.div_ceil(sector_size as u64);

        let path = directory.join(region_key.name());
        let storage = SectorStorage::open(&path, sector_size, header_sectors)?;
        let sector_map = PackedSectorMap::read_from(&storage, key_count, self.specials)?;
        let tracker = SectorTracker::from_map(&sector_map, header_sectors, storage.sector_count());

        Ok(RegionFile {
            storage,
            sector_map,
            tracker,
            extra_headers: self.extra_headers,
            region_key,
            key_count,
            sector_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    const KEYS: u32 = 32;

    fn open_region(dir: &Path) -> RegionFile {
        RegionFile::builder()
            .directory(dir)
            .region_key(RegionKey::new("0.0.2dr").unwrap())
            .key_count(KEYS)
            .sector_size(512)
            .open()
            .unwrap()
    }

    fn key(region: &RegionFile, id: u32) -> EntryKey {
        EntryKey::new(region.region_key().clone(), id)
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let k = key(&region, 3);

        region.write(&k, b"hello region").unwrap();

        assert_eq!(region.read(&k).unwrap().unwrap(), b"hello region");
        assert!(region.has(&k).unwrap());
    }

    #[test]
    fn empty_payloads_are_distinct_from_absent() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let k = key(&region, 0);

        region.write(&k, b"").unwrap();

        assert_eq!(region.read(&k).unwrap(), Some(Vec::new()));
        assert_eq!(region.read(&key(&region, 1)).unwrap(), None);
    }

    #[test]
    fn overwrite_returns_the_newest_value() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let k = key(&region, 5);

        region.write(&k, &vec![1u8; 600]).unwrap();
        region.write(&k, &vec![2u8; 40]).unwrap();

        assert_eq!(region.read(&k).unwrap().unwrap(), vec![2u8; 40]);
    }

    #[test]
    fn erase_removes_the_entry() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let k = key(&region, 5);
        region.write(&k, b"gone soon").unwrap();

        region.erase(&k).unwrap();

        assert_eq!(region.read(&k).unwrap(), None);
        assert!(!region.has(&k).unwrap());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let payload: Vec<u8> = (0..10).collect();
        {
            let mut region = open_region(dir.path());
            let k = key(&region, 7);
            region.write(&k, &payload).unwrap();
            region.close().unwrap();
        }

        let mut region = open_region(dir.path());

        assert_eq!(region.read(&key(&region, 7)).unwrap().unwrap(), payload);
    }

    #[test]
    fn oversized_writes_are_rejected_without_damage() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let k = key(&region, 2);
        region.write(&k, b"survivor").unwrap();

        let err = region.write(&k, &vec![0u8; 255 * 512]).unwrap_err();

        assert!(err.downcast_ref::<UnsupportedData>().is_some());
        assert_eq!(region.read(&k).unwrap().unwrap(), b"survivor");
    }

    #[test]
    fn largest_inline_payload_fits_exactly() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let k = key(&region, 2);
        let payload = vec![9u8; 255 * 512 - 4];

        region.write(&k, &payload).unwrap();

        assert_eq!(region.read(&k).unwrap().unwrap(), payload);
    }

    #[test]
    fn growing_into_free_tail_keeps_the_offset() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let k = key(&region, 0);

        region.write(&k, &vec![1u8; 100]).unwrap();
        let before = region.sector_map.get(0).unwrap();
        region.write(&k, &vec![2u8; 1200]).unwrap();
        let after = region.sector_map.get(0).unwrap();

        assert_eq!(after.offset(), before.offset());
        assert_eq!(after.size(), 3);
        for sector in after.offset()..after.offset() + after.size() {
            assert!(!region.tracker.is_free(sector as u64));
        }
    }

    #[test]
    fn payload_is_zero_padded_to_the_sector_boundary() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let k = key(&region, 0);
        region.write(&k, &vec![0xEEu8; 300]).unwrap();

        region.write(&k, &vec![0x11u8; 10]).unwrap();

        let loc = region.sector_map.get(0).unwrap();
        let raw = region
            .storage
            .bytes(loc.offset() as u64 * 512, 512)
            .unwrap();
        assert_eq!(&raw[4..14], &[0x11u8; 10]);
        assert!(raw[14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn corrupted_length_prefix_is_detected() {
        let dir = tempdir().unwrap();
        let offset;
        {
            let mut region = open_region(dir.path());
            let k = key(&region, 0);
            region.write(&k, b"fine").unwrap();
            offset = region.sector_map.get(0).unwrap().offset() as u64 * 512;
            region.close().unwrap();
        }

        let path = dir.path().join("0.0.2dr");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[offset as usize..offset as usize + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut region = open_region(dir.path());
        let err = region.read(&key(&region, 0)).unwrap_err();

        assert!(err.downcast_ref::<CorruptedData>().is_some());
    }

    #[test]
    fn timestamp_column_lands_after_the_sector_map() {
        let dir = tempdir().unwrap();
        let mut region = RegionFile::builder()
            .directory(dir.path())
            .region_key(RegionKey::new("0.0.2dr").unwrap())
            .key_count(KEYS)
            .sector_size(512)
            .with_timestamps(TimestampResolution::Seconds)
            .open()
            .unwrap();
        let k = key(&region, 3);

        region.write(&k, b"stamped").unwrap();

        let column = KEYS as u64 * 4;
        let raw = region.storage.bytes(column + 3 * 4, 4).unwrap();
        let stamp = u32::from_be_bytes(raw.try_into().unwrap());
        assert!(stamp > 0);
    }

    #[test]
    fn keys_from_other_regions_are_rejected() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        let foreign = EntryKey::new(RegionKey::new("1.0.2dr").unwrap(), 0);

        assert!(region.read(&foreign).is_err());
        assert!(region.write(&foreign, b"x").is_err());
    }

    #[test]
    fn special_markers_round_trip_through_their_reader() {
        let dir = tempdir().unwrap();
        let mut region = RegionFile::builder()
            .directory(dir.path())
            .region_key(RegionKey::new("0.0.2dr").unwrap())
            .key_count(KEYS)
            .sector_size(512)
            .add_special_entry(SpecialSectorEntry::new(
                "all-air",
                u32::MAX,
                Arc::new(|_| b"synthetic".to_vec()),
                Arc::new(|_, _| {}),
            ))
            .open()
            .unwrap();
        let k = key(&region, 4);

        region.write_special(&k, "all-air").unwrap();

        assert!(region.has(&k).unwrap());
        assert_eq!(region.read(&k).unwrap().unwrap(), b"synthetic");
        assert!(region.write_special(&k, "unregistered").is_err());
    }

    #[test]
    fn allocation_colliding_with_a_special_word_runs_the_handler() {
        let dir = tempdir().unwrap();
        // raw value (1 << 8) | 1 is exactly what the first one-sector
        // allocation packs to, forcing a collision
        let stash: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let write_stash = Arc::clone(&stash);
        let read_stash = Arc::clone(&stash);
        let mut region = RegionFile::builder()
            .directory(dir.path())
            .region_key(RegionKey::new("0.0.2dr").unwrap())
            .key_count(KEYS)
            .sector_size(512)
            .add_special_entry(SpecialSectorEntry::new(
                "first-sector",
                (1 << 8) | 1,
                Arc::new(move |_| read_stash.lock().unwrap().clone().unwrap_or_default()),
                Arc::new(move |_, payload: &mut Vec<u8>| {
                    *write_stash.lock().unwrap() = Some(payload.clone());
                }),
            ))
            .open()
            .unwrap();
        let k = key(&region, 9);

        region.write(&k, b"collided").unwrap();

        assert_eq!(stash.lock().unwrap().as_deref(), Some(&b"collided"[..]));
        assert_eq!(region.read(&k).unwrap().unwrap(), b"collided");
    }

    #[test]
    fn for_each_key_yields_ascending_ids() {
        let dir = tempdir().unwrap();
        let mut region = open_region(dir.path());
        for id in [9, 2, 17] {
            region.write(&key(&region, id), b"x").unwrap();
        }

        let mut seen = Vec::new();
        region
            .for_each_key(&mut |k| {
                seen.push(k.id());
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec![2, 9, 17]);
    }
}
