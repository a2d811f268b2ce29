//! # Keys and Key Models
//!
//! Entries are addressed by an [`EntryKey`]: a region (named by a
//! [`RegionKey`]) plus a small integer id inside that region. How world
//! coordinates map onto region names and ids is the business of a
//! [`KeyModel`]; the storage engine itself only ever sees `(region, id)`
//! pairs and asks the model for the fixed entry count of a region.
//!
//! ## Region Names
//!
//! A region key doubles as a file name, so it is restricted to the
//! lowercase set `[a-z0-9._-]`. Each model additionally imposes its own
//! pattern (for example `X.Z.2dr` with signed decimal coordinates) through
//! [`KeyModel::is_valid`]; the engine treats names as opaque.
//!
//! ## Entry Ids
//!
//! Ids are dense in `0..key_count(region)` and the count is a constant per
//! region for a given model. The packed region header is sized from it, so
//! a model must never report different counts for the same region.

mod anvil;
mod grid;

pub use anvil::McAnvil;
pub use grid::{Grid2d, Grid3d, ENTRIES_PER_REGION_2D, ENTRIES_PER_REGION_3D};

use std::fmt;
use std::sync::Arc;

use eyre::Result;

use crate::error::InvalidKey;

/// Name of one region, usable as a file name. Equality and hash are by the
/// underlying string; cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey(Arc<str>);

impl RegionKey {
    /// Validates and wraps a region name. Names are limited to the
    /// filesystem-safe lowercase set `[a-z0-9._-]+`.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if name.is_empty()
            || !name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(InvalidKey(format!("invalid region name '{name}'")).into());
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one entry: a region plus the entry's id within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    region: RegionKey,
    id: u32,
}

impl EntryKey {
    pub fn new(region: RegionKey, id: u32) -> Self {
        Self { region, id }
    }

    pub fn region_key(&self) -> &RegionKey {
        &self.region
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.region, self.id)
    }
}

/// Maps between region names, entry ids and whatever external coordinate
/// space a particular world model uses. Region storage is parameterized by
/// a model, never by a coordinate type.
pub trait KeyModel: Send + Sync {
    /// Number of entries a region of this model holds. Constant per region.
    fn key_count(&self, region: &RegionKey) -> u32;

    /// Whether the name matches this model's region name pattern.
    fn is_valid(&self, region: &RegionKey) -> bool;

    /// Builds an [`EntryKey`] after validating the region name and id
    /// range. Fails with [`InvalidKey`] otherwise.
    fn from_region_and_id(&self, region: &RegionKey, id: u32) -> Result<EntryKey>;
}

/// Checks that `s` is an optionally negated decimal integer, the same shape
/// the region name patterns accept (`-?[0-9]+`), and parses it.
pub(crate) fn parse_signed(s: &str) -> Option<i32> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
