//! # Sidecar Region
//!
//! `ExtRegion` stores entries too large for the inline format, one file
//! per id inside a `<region_key>.ext/` directory sibling to the inline
//! region file. Each file holds the region's extra header columns' entries
//! for that id (the sector map column is inline-only), then the payload;
//! the payload length is the file length minus the header prefix, so no
//! length field is needed.
//!
//! Writes go through a temp file that is fsynced and atomically renamed
//! over the target: a crash leaves either the prior file or the complete
//! new one, never a torn state.
//!
//! The sidecar directory is created lazily on the first real write.
//! Erasing a key that was never written must not create it: the store
//! erases through every fallback tier after a successful write, and that
//! common path would otherwise sprinkle empty `.ext` directories
//! everywhere.
//!
//! One filesystem entry per oversized id is an accepted trade: oversized
//! entries are assumed rare.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use eyre::{bail, Result, WrapErr};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::UnsupportedData;
use crate::key::{EntryKey, RegionKey};

use super::{HeaderProvider, Region, SectorBitmap};

/// Suffix of sidecar directories, appended to the region name.
pub const EXT_DIR_SUFFIX: &str = ".ext";

pub struct ExtRegion {
    directory: PathBuf,
    header_providers: Vec<Box<dyn HeaderProvider>>,
    total_header_size: usize,
    region_key: RegionKey,
    key_count: u32,
    exists: SectorBitmap,
    initialized: bool,
}

impl ExtRegion {
    /// Opens the sidecar for `region_key` under `save_directory`. The
    /// sidecar directory itself is only scanned when it already exists; it
    /// is never created here.
    pub fn open(
        save_directory: &std::path::Path,
        region_key: RegionKey,
        key_count: u32,
        header_providers: Vec<Box<dyn HeaderProvider>>,
    ) -> Result<Self> {
        let directory = save_directory.join(format!("{}{}", region_key.name(), EXT_DIR_SUFFIX));
        let total_header_size = header_providers.iter().map(|p| p.byte_count()).sum();

        let mut region = Self {
            directory,
            header_providers,
            total_header_size,
            region_key,
            key_count,
            exists: SectorBitmap::with_capacity(key_count as u64),
            initialized: false,
        };

        if region.directory.is_dir() {
            region.initialized = true;
            let entries = fs::read_dir(&region.directory).wrap_err_with(|| {
                format!(
                    "failed to list sidecar directory '{}'",
                    region.directory.display()
                )
            })?;
            for entry in entries {
                let entry = entry.wrap_err("failed to read sidecar directory entry")?;
                if let Ok(id) = entry.file_name().to_string_lossy().parse::<u32>() {
                    if id < key_count {
                        region.exists.set(id as u64);
                    }
                }
            }
        }

        Ok(region)
    }

    fn entry_path(&self, id: u32) -> PathBuf {
        self.directory.join(id.to_string())
    }

    fn write_value(&mut self, key: &EntryKey, value: &[u8]) -> Result<()> {
        let id = key.id();
        if !self.initialized {
            fs::create_dir_all(&self.directory).wrap_err_with(|| {
                format!(
                    "failed to create sidecar directory '{}'",
                    self.directory.display()
                )
            })?;
            self.initialized = true;
        }

        let mut header: SmallVec<[u8; 16]> = SmallVec::new();
        for provider in &self.header_providers {
            let start = header.len();
            header.resize(start + provider.byte_count(), 0);
            provider.write_entry(key, &mut header[start..]);
        }

        let final_path = self.entry_path(id);
        let tmp_path = self.directory.join(format!("{id}.tmp"));
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .wrap_err_with(|| {
                    format!("failed to create sidecar temp file '{}'", tmp_path.display())
                })?;
            tmp.write_all(&header)
                .and_then(|_| tmp.write_all(value))
                .and_then(|_| tmp.sync_all())
                .wrap_err_with(|| {
                    format!("failed to write sidecar entry '{}'", tmp_path.display())
                })?;
        }

        // the rename is what makes the replacement atomic
        fs::rename(&tmp_path, &final_path).wrap_err_with(|| {
            format!(
                "failed to move sidecar entry into place at '{}'",
                final_path.display()
            )
        })?;
        self.exists.set(id as u64);
        trace!(region = %self.region_key, id, bytes = value.len(), "wrote sidecar entry");
        Ok(())
    }

    fn erase_value(&mut self, key: &EntryKey) -> Result<()> {
        let id = key.id();
        if !self.initialized || !self.exists.get(id as u64) {
            // never create the directory just to record an absence
            return Ok(());
        }
        let path = self.entry_path(id);
        if path.exists() {
            fs::remove_file(&path).wrap_err_with(|| {
                format!("failed to delete sidecar entry '{}'", path.display())
            })?;
        }
        self.exists.clear(id as u64);
        Ok(())
    }
}

impl Region for ExtRegion {
    fn region_key(&self) -> &RegionKey {
        &self.region_key
    }

    fn write(&mut self, key: &EntryKey, value: Option<&[u8]>) -> Result<()> {
        match value {
            Some(bytes) => self.write_value(key, bytes),
            None => self.erase_value(key),
        }
    }

    fn write_special(&mut self, _key: &EntryKey, _marker: &str) -> Result<()> {
        bail!("sidecar regions do not support special values")
    }

    fn read(&mut self, key: &EntryKey) -> Result<Option<Vec<u8>>> {
        let id = key.id();
        if !self.initialized || !self.exists.get(id as u64) {
            return Ok(None);
        }
        let path = self.entry_path(id);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.exists.clear(id as u64);
                return Ok(None);
            }
            Err(err) => {
                return Err(err).wrap_err_with(|| {
                    format!("failed to open sidecar entry '{}'", path.display())
                })
            }
        };

        let size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat sidecar entry '{}'", path.display()))?
            .len();
        let payload_size = size.saturating_sub(self.total_header_size as u64);
        if payload_size > i32::MAX as u64 {
            return Err(
                UnsupportedData::new("sidecar entry exceeds 2^31-1 bytes", payload_size).into(),
            );
        }

        file.seek(SeekFrom::Start(self.total_header_size as u64))
            .wrap_err("failed to seek past sidecar entry header")?;
        let mut payload = Vec::with_capacity(payload_size as usize);
        file.read_to_end(&mut payload)
            .wrap_err_with(|| format!("failed to read sidecar entry '{}'", path.display()))?;
        Ok(Some(payload))
    }

    fn has(&mut self, key: &EntryKey) -> Result<bool> {
        let id = key.id();
        if !self.exists.get(id as u64) {
            return Ok(false);
        }
        if self.entry_path(id).exists() {
            Ok(true)
        } else {
            // stale bit, the file vanished under us
            self.exists.clear(id as u64);
            Ok(false)
        }
    }

    fn for_each_key(&mut self, f: &mut dyn FnMut(EntryKey) -> Result<()>) -> Result<()> {
        for id in 0..self.key_count {
            if self.exists.get(id as u64) {
                f(EntryKey::new(self.region_key.clone(), id))?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // every write is already synced and atomically renamed
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_ext(dir: &std::path::Path) -> ExtRegion {
        ExtRegion::open(dir, RegionKey::new("0.0.2dr").unwrap(), 32, Vec::new()).unwrap()
    }

    fn key(region: &ExtRegion, id: u32) -> EntryKey {
        EntryKey::new(region.region_key().clone(), id)
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let mut region = open_ext(dir.path());
        let k = key(&region, 5);

        region.write(&k, Some(b"sidecar payload")).unwrap();

        assert_eq!(region.read(&k).unwrap().unwrap(), b"sidecar payload");
        assert!(region.has(&k).unwrap());
        assert!(dir.path().join("0.0.2dr.ext").join("5").is_file());
    }

    #[test]
    fn erase_of_absent_does_not_create_the_directory() {
        let dir = tempdir().unwrap();
        let mut region = open_ext(dir.path());
        let k = key(&region, 5);

        region.write(&k, None).unwrap();

        assert!(!dir.path().join("0.0.2dr.ext").exists());
    }

    #[test]
    fn erase_deletes_the_entry_file() {
        let dir = tempdir().unwrap();
        let mut region = open_ext(dir.path());
        let k = key(&region, 5);
        region.write(&k, Some(b"bytes")).unwrap();

        region.write(&k, None).unwrap();

        assert!(!region.has(&k).unwrap());
        assert_eq!(region.read(&k).unwrap(), None);
        assert!(!dir.path().join("0.0.2dr.ext").join("5").exists());
    }

    #[test]
    fn reopen_repopulates_presence_from_the_listing() {
        let dir = tempdir().unwrap();
        {
            let mut region = open_ext(dir.path());
            region.write(&key(&region, 3), Some(b"a")).unwrap();
            region.write(&key(&region, 9), Some(b"b")).unwrap();
        }

        let mut region = open_ext(dir.path());

        let mut ids = Vec::new();
        region
            .for_each_key(&mut |k| {
                ids.push(k.id());
                Ok(())
            })
            .unwrap();
        assert_eq!(ids, vec![3, 9]);
    }

    #[test]
    fn stray_files_in_the_sidecar_are_ignored() {
        let dir = tempdir().unwrap();
        let sidecar = dir.path().join("0.0.2dr.ext");
        std::fs::create_dir_all(&sidecar).unwrap();
        std::fs::write(sidecar.join("notanumber"), b"x").unwrap();
        std::fs::write(sidecar.join("999999"), b"x").unwrap();

        let mut region = open_ext(dir.path());

        let mut count = 0;
        region
            .for_each_key(&mut |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn stale_presence_bits_are_repaired_by_has() {
        let dir = tempdir().unwrap();
        let mut region = open_ext(dir.path());
        let k = key(&region, 2);
        region.write(&k, Some(b"bytes")).unwrap();
        std::fs::remove_file(dir.path().join("0.0.2dr.ext").join("2")).unwrap();

        assert!(!region.has(&k).unwrap());
        assert!(!region.has(&k).unwrap());
    }

    #[test]
    fn header_prefix_is_skipped_on_read() {
        use crate::region::{TimestampHeaderProvider, TimestampResolution};

        let dir = tempdir().unwrap();
        let mut region = ExtRegion::open(
            dir.path(),
            RegionKey::new("0.0.2dr").unwrap(),
            32,
            vec![Box::new(TimestampHeaderProvider::new(
                TimestampResolution::Seconds,
            ))],
        )
        .unwrap();
        let k = key(&region, 0);

        region.write(&k, Some(b"after header")).unwrap();

        assert_eq!(region.read(&k).unwrap().unwrap(), b"after header");
        let on_disk = std::fs::read(dir.path().join("0.0.2dr.ext").join("0")).unwrap();
        assert_eq!(on_disk.len(), 4 + b"after header".len());
    }

    #[test]
    fn special_values_are_refused() {
        let dir = tempdir().unwrap();
        let mut region = open_ext(dir.path());

        assert!(region.write_special(&key(&region, 0), "marker").is_err());
    }
}
