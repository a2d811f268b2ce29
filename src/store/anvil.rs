//! # Anvil-Compatible Store
//!
//! A single-tier store over Minecraft Anvil region files: 4096-byte
//! sectors, a big-endian millisecond timestamp column after the sector
//! map, `r.X.Z.mca` naming. Values too large for the inline format are
//! rejected (vanilla region files have no sidecar tier).

use std::path::Path;
use std::sync::Arc;

use eyre::Result;

use crate::config::{ANVIL_SECTOR_SIZE, DEFAULT_LOCAL_CACHE_SIZE};
use crate::key::McAnvil;
use crate::provider::{CachedRegionProvider, SimpleRegionFactory};
use crate::region::TimestampResolution;

use super::RegionStore;

pub struct AnvilStore {
    store: RegionStore,
    model: McAnvil,
}

impl AnvilStore {
    /// Opens a store over the `.mca` region files in `directory`.
    pub fn open(directory: impl AsRef<Path>, model: McAnvil) -> Result<Self> {
        std::fs::create_dir_all(directory.as_ref())?;
        let factory = Arc::new(
            SimpleRegionFactory::new(model.clone(), directory.as_ref(), ANVIL_SECTOR_SIZE)
                .with_timestamps(TimestampResolution::Millis),
        );
        let store = RegionStore::new(vec![Arc::new(CachedRegionProvider::new(
            factory,
            DEFAULT_LOCAL_CACHE_SIZE,
        ))]);
        Ok(Self { store, model })
    }

    pub fn put(&self, x: i32, z: i32, data: &[u8]) -> Result<()> {
        self.store.put(&self.model.key(x, z), data)
    }

    pub fn get(&self, x: i32, z: i32) -> Result<Option<Vec<u8>>> {
        self.store.get(&self.model.key(x, z), true)
    }

    pub fn delete(&self, x: i32, z: i32) -> Result<()> {
        self.store.delete(&self.model.key(x, z))
    }

    pub fn has(&self, x: i32, z: i32) -> Result<bool> {
        self.store.has(&self.model.key(x, z))
    }

    /// The underlying store, for key-level access and iteration.
    pub fn store(&self) -> &RegionStore {
        &self.store
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}
