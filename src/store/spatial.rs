//! # Bundled 2D + 3D Store
//!
//! `SpatialStore` is the batteries-included façade for voxel-world saves:
//! one root directory holding a 2D section (columns) and a 3D section
//! (cubes), each a [`RegionStore`] with an inline tier and a sidecar tier
//! over the process-wide shared cache:
//!
//! ```text
//! <root>/
//!   region2d/            inline 2D region files (X.Z.2dr)
//!   region2d/*.ext/      2D sidecars for oversized entries
//!   region3d/            inline 3D region files (X.Y.Z.3dr)
//!   region3d/*.ext/      3D sidecars
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};

use crate::config::DEFAULT_SECTOR_SIZE;
use crate::key::{EntryKey, Grid2d, Grid3d, KeyModel};
use crate::provider::{ExtRegionFactory, SharedCachedRegionProvider, SimpleRegionFactory};

use super::RegionStore;

/// Directory of the 2D section under the save root.
pub const SECTION_2D_DIR: &str = "region2d";

/// Directory of the 3D section under the save root.
pub const SECTION_3D_DIR: &str = "region3d";

pub struct SpatialStore {
    section_2d: RegionStore,
    section_3d: RegionStore,
}

impl SpatialStore {
    /// Opens (creating directories as needed) a save under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let dir_2d = root.join(SECTION_2D_DIR);
        let dir_3d = root.join(SECTION_3D_DIR);
        for dir in [&dir_2d, &dir_3d] {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("failed to create save directory '{}'", dir.display()))?;
        }

        Ok(Self {
            section_2d: tiered_section(Grid2d, &dir_2d),
            section_3d: tiered_section(Grid3d, &dir_3d),
        })
    }

    /// The underlying 2D section.
    pub fn section_2d(&self) -> &RegionStore {
        &self.section_2d
    }

    /// The underlying 3D section.
    pub fn section_3d(&self) -> &RegionStore {
        &self.section_3d
    }

    pub fn put_2d(&self, x: i32, z: i32, data: &[u8]) -> Result<()> {
        self.section_2d.put(&Grid2d.key(x, z), data)
    }

    pub fn get_2d(&self, x: i32, z: i32) -> Result<Option<Vec<u8>>> {
        self.section_2d.get(&Grid2d.key(x, z), true)
    }

    pub fn delete_2d(&self, x: i32, z: i32) -> Result<()> {
        self.section_2d.delete(&Grid2d.key(x, z))
    }

    pub fn put_3d(&self, x: i32, y: i32, z: i32, data: &[u8]) -> Result<()> {
        self.section_3d.put(&Grid3d.key(x, y, z), data)
    }

    pub fn get_3d(&self, x: i32, y: i32, z: i32) -> Result<Option<Vec<u8>>> {
        self.section_3d.get(&Grid3d.key(x, y, z), true)
    }

    pub fn delete_3d(&self, x: i32, y: i32, z: i32) -> Result<()> {
        self.section_3d.delete(&Grid3d.key(x, y, z))
    }

    /// Batched 3D write; written entries are removed from the map.
    pub fn put_many_3d(&self, entries: &mut HashMap<EntryKey, Vec<u8>>) -> Result<()> {
        self.section_3d.put_many(entries)
    }

    /// Batched 2D write; written entries are removed from the map.
    pub fn put_many_2d(&self, entries: &mut HashMap<EntryKey, Vec<u8>>) -> Result<()> {
        self.section_2d.put_many(entries)
    }

    pub fn flush(&self) -> Result<()> {
        self.section_2d.flush()?;
        self.section_3d.flush()
    }

    /// Closes both sections. The first error is returned after both had
    /// the chance to close.
    pub fn close(&self) -> Result<()> {
        let first = self.section_2d.close();
        let second = self.section_3d.close();
        first.and(second)
    }
}

/// The standard two-tier section: inline region files with default-sized
/// sectors, sidecars for what does not fit, both over the global cache.
fn tiered_section<M: KeyModel + Clone + 'static>(model: M, dir: &Path) -> RegionStore {
    let inline = Arc::new(SimpleRegionFactory::new(
        model.clone(),
        dir,
        DEFAULT_SECTOR_SIZE,
    ));
    let ext = Arc::new(ExtRegionFactory::new(model, dir));
    RegionStore::new(vec![
        Arc::new(SharedCachedRegionProvider::new(inline)),
        Arc::new(SharedCachedRegionProvider::new(ext)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_both_section_directories() {
        let dir = tempdir().unwrap();

        SpatialStore::open(dir.path().join("save")).unwrap();

        assert!(dir.path().join("save").join(SECTION_2D_DIR).is_dir());
        assert!(dir.path().join("save").join(SECTION_3D_DIR).is_dir());
    }

    #[test]
    fn sections_are_independent() {
        let dir = tempdir().unwrap();
        let store = SpatialStore::open(dir.path()).unwrap();

        store.put_2d(5, 6, b"column").unwrap();
        store.put_3d(5, 0, 6, b"cube").unwrap();

        assert_eq!(store.get_2d(5, 6).unwrap().unwrap(), b"column");
        assert_eq!(store.get_3d(5, 0, 6).unwrap().unwrap(), b"cube");
        assert_eq!(store.get_3d(5, 1, 6).unwrap(), None);
    }

    #[test]
    fn deletes_are_per_section() {
        let dir = tempdir().unwrap();
        let store = SpatialStore::open(dir.path()).unwrap();
        store.put_2d(1, 1, b"stays").unwrap();
        store.put_3d(1, 1, 1, b"goes").unwrap();

        store.delete_3d(1, 1, 1).unwrap();

        assert_eq!(store.get_2d(1, 1).unwrap().unwrap(), b"stays");
        assert_eq!(store.get_3d(1, 1, 1).unwrap(), None);
    }
}
