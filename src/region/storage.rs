//! # Memory-Mapped Sector Storage
//!
//! `SectorStorage` maps a region file into the process address space and
//! hands out byte slices over it. The sector size is fixed per file at
//! open time; the file length is always kept at a whole number of sectors,
//! which is what lets `flush` be a plain msync (the padding invariant is
//! maintained structurally instead of patched up afterwards).
//!
//! ## Safety Model
//!
//! The mapping becomes invalid when the file is grown and remapped.
//! Instead of runtime guards, the borrow checker enforces safety at
//! compile time: slice accessors borrow `&self`/`&mut self` and `grow`
//! takes `&mut self`, so no slice can be live across a remap.
//!
//! ## Growth
//!
//! Region files grow in sector units as the allocator hands out space past
//! the current end. Growth flushes the old mapping asynchronously,
//! extends the file, and remaps.

use std::fs::OpenOptions;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

#[derive(Debug)]
pub struct SectorStorage {
    file: std::fs::File,
    mmap: MmapMut,
    sector_size: usize,
    sector_count: u64,
}

impl SectorStorage {
    /// Opens (or creates) the file at `path`, padding it up to a whole
    /// number of sectors and to at least `min_sectors`.
    pub fn open(path: &Path, sector_size: usize, min_sectors: u64) -> Result<Self> {
        ensure!(sector_size > 0, "sector size must be positive");
        ensure!(min_sectors > 0, "a region file has at least one sector");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open region file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat region file '{}'", path.display()))?
            .len();

        let sector_count = (len.div_ceil(sector_size as u64)).max(min_sectors);
        let aligned = sector_count * sector_size as u64;
        if aligned != len {
            file.set_len(aligned)
                .wrap_err_with(|| format!("failed to size region file to {aligned} bytes"))?;
        }

        // SAFETY: the file was opened read+write and sized to a non-zero
        // multiple of the sector size above. Region files are owned by a
        // single process; all access goes through the bounds-checked
        // bytes()/bytes_mut() accessors, and the mapping's lifetime is
        // tied to this struct.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            sector_size,
            sector_count,
        })
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn sector_count(&self) -> u64 {
        self.sector_count
    }

    pub fn file_size(&self) -> u64 {
        self.sector_count * self.sector_size as u64
    }

    /// Extends the file to `new_sector_count` sectors and remaps. No-op if
    /// the file is already that large.
    pub fn grow(&mut self, new_sector_count: u64) -> Result<()> {
        if new_sector_count <= self.sector_count {
            return Ok(());
        }

        self.mmap
            .flush_async()
            .wrap_err("failed to flush mapping before grow")?;

        let new_size = new_sector_count * self.sector_size as u64;
        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend region file to {new_size} bytes"))?;

        // SAFETY: grow() takes &mut self, so the borrow checker guarantees
        // no slices into the old mapping are live. The old mapping was
        // flushed and the file extended before remapping; the old mapping
        // is dropped by the assignment.
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file).wrap_err("failed to remap region file after grow")?
        };
        self.sector_count = new_sector_count;

        Ok(())
    }

    /// Borrows `len` bytes starting at byte `offset`.
    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.check_range(offset, len)?;
        let offset = offset as usize;
        Ok(&self.mmap[offset..offset + len])
    }

    /// Mutably borrows `len` bytes starting at byte `offset`.
    pub fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        self.check_range(offset, len)?;
        let offset = offset as usize;
        Ok(&mut self.mmap[offset..offset + len])
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        ensure!(
            offset + len as u64 <= self.file_size(),
            "range {}..{} out of bounds for region file of {} bytes",
            offset,
            offset + len as u64,
            self.file_size()
        );
        Ok(())
    }

    /// Flushes the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync region file")
    }

    /// Hints the kernel to page in `count` sectors starting at `sector`.
    pub fn prefetch_sectors(&self, sector: u64, count: u64) {
        if sector >= self.sector_count {
            return;
        }
        let end = (sector + count).min(self.sector_count);
        let start_offset = sector as usize * self.sector_size;
        let len = (end - sector) as usize * self.sector_size;

        #[cfg(unix)]
        // SAFETY: the range was clamped to the mapping above; madvise with
        // MADV_WILLNEED is a hint and does not mutate the mapping.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().add(start_offset) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }
        #[cfg(not(unix))]
        let _ = (start_offset, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_pads_a_new_file_to_min_sectors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.0.2dr");

        let storage = SectorStorage::open(&path, 512, 8).unwrap();

        assert_eq!(storage.sector_count(), 8);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8 * 512);
    }

    #[test]
    fn open_rounds_an_unaligned_file_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.0.2dr");
        std::fs::write(&path, vec![7u8; 700]).unwrap();

        let storage = SectorStorage::open(&path, 512, 1).unwrap();

        assert_eq!(storage.sector_count(), 2);
        assert_eq!(storage.bytes(0, 700).unwrap(), &vec![7u8; 700][..]);
        assert_eq!(storage.bytes(700, 324).unwrap(), &[0u8; 324][..]);
    }

    #[test]
    fn grow_preserves_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.0.2dr");
        let mut storage = SectorStorage::open(&path, 512, 1).unwrap();
        storage.bytes_mut(0, 4).unwrap().copy_from_slice(b"abcd");

        storage.grow(4).unwrap();

        assert_eq!(storage.sector_count(), 4);
        assert_eq!(storage.bytes(0, 4).unwrap(), b"abcd");
    }

    #[test]
    fn out_of_bounds_ranges_are_rejected() {
        let dir = tempdir().unwrap();
        let storage = SectorStorage::open(&dir.path().join("0.0.2dr"), 512, 1).unwrap();

        assert!(storage.bytes(0, 512).is_ok());
        assert!(storage.bytes(0, 513).is_err());
        assert!(storage.bytes(512, 1).is_err());
    }

    #[test]
    fn reopen_sees_synced_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0.0.2dr");
        {
            let mut storage = SectorStorage::open(&path, 512, 2).unwrap();
            storage.bytes_mut(512, 5).unwrap().copy_from_slice(b"hello");
            storage.sync().unwrap();
        }

        let storage = SectorStorage::open(&path, 512, 2).unwrap();

        assert_eq!(storage.bytes(512, 5).unwrap(), b"hello");
    }
}
