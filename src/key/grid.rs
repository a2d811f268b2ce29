//! # Grid Key Models
//!
//! The archetypal spatial models: entries live on an integer grid and group
//! into 32x32 (2D) or 32x32x32 (3D) regions. The region coordinate is the
//! entry coordinate shifted right by five; the entry id packs the low five
//! bits of each axis.
//!
//! Region name formats:
//!
//! - 2D: `X.Z.2dr`, id = `(x & 31) << 5 | (z & 31)`, 1024 entries
//! - 3D: `X.Y.Z.3dr`, id = `(x & 31) << 10 | (y & 31) << 5 | (z & 31)`,
//!   32768 entries
//!
//! The 2D id order (`x` in the high bits) is deliberate and pinned by test;
//! the Anvil model in this crate uses the opposite order.

use eyre::Result;

use super::{parse_signed, EntryKey, KeyModel, RegionKey};
use crate::error::InvalidKey;

const LOC_BITS: u32 = 5;
const LOC_MASK: i32 = (1 << LOC_BITS) - 1;

/// Entries per 2D region.
pub const ENTRIES_PER_REGION_2D: u32 = 1 << (2 * LOC_BITS);

/// Entries per 3D region.
pub const ENTRIES_PER_REGION_3D: u32 = 1 << (3 * LOC_BITS);

/// 2D grid model (`X.Z.2dr`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Grid2d;

impl Grid2d {
    /// Entry key for grid position `(x, z)`.
    pub fn key(&self, x: i32, z: i32) -> EntryKey {
        let name = format!("{}.{}.2dr", x >> LOC_BITS, z >> LOC_BITS);
        // INVARIANT: digits, '-' and '.' are always filesystem safe
        let region = RegionKey::new(name).expect("grid region name is always valid");
        let id = (((x & LOC_MASK) << LOC_BITS) | (z & LOC_MASK)) as u32;
        EntryKey::new(region, id)
    }

    /// Grid position of an entry key produced by this model.
    pub fn coords(&self, key: &EntryKey) -> Result<(i32, i32)> {
        let [rx, rz] = parse_grid_name(key.region_key().name(), "2dr")
            .ok_or_else(|| InvalidKey(format!("invalid 2d region name '{}'", key.region_key())))?;
        let id = key.id() as i32;
        Ok((
            (rx << LOC_BITS) | (id >> LOC_BITS),
            (rz << LOC_BITS) | (id & LOC_MASK),
        ))
    }
}

impl KeyModel for Grid2d {
    fn key_count(&self, _region: &RegionKey) -> u32 {
        ENTRIES_PER_REGION_2D
    }

    fn is_valid(&self, region: &RegionKey) -> bool {
        parse_grid_name::<2>(region.name(), "2dr").is_some()
    }

    fn from_region_and_id(&self, region: &RegionKey, id: u32) -> Result<EntryKey> {
        check_region_and_id(self, region, id)
    }
}

/// 3D grid model (`X.Y.Z.3dr`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Grid3d;

impl Grid3d {
    /// Entry key for grid position `(x, y, z)`.
    pub fn key(&self, x: i32, y: i32, z: i32) -> EntryKey {
        let name = format!(
            "{}.{}.{}.3dr",
            x >> LOC_BITS,
            y >> LOC_BITS,
            z >> LOC_BITS
        );
        // INVARIANT: digits, '-' and '.' are always filesystem safe
        let region = RegionKey::new(name).expect("grid region name is always valid");
        let id = (((x & LOC_MASK) << (2 * LOC_BITS))
            | ((y & LOC_MASK) << LOC_BITS)
            | (z & LOC_MASK)) as u32;
        EntryKey::new(region, id)
    }

    /// Grid position of an entry key produced by this model.
    pub fn coords(&self, key: &EntryKey) -> Result<(i32, i32, i32)> {
        let [rx, ry, rz] = parse_grid_name(key.region_key().name(), "3dr")
            .ok_or_else(|| InvalidKey(format!("invalid 3d region name '{}'", key.region_key())))?;
        let id = key.id() as i32;
        Ok((
            (rx << LOC_BITS) | (id >> (2 * LOC_BITS)),
            (ry << LOC_BITS) | ((id >> LOC_BITS) & LOC_MASK),
            (rz << LOC_BITS) | (id & LOC_MASK),
        ))
    }
}

impl KeyModel for Grid3d {
    fn key_count(&self, _region: &RegionKey) -> u32 {
        ENTRIES_PER_REGION_3D
    }

    fn is_valid(&self, region: &RegionKey) -> bool {
        parse_grid_name::<3>(region.name(), "3dr").is_some()
    }

    fn from_region_and_id(&self, region: &RegionKey, id: u32) -> Result<EntryKey> {
        check_region_and_id(self, region, id)
    }
}

fn check_region_and_id<M: KeyModel>(model: &M, region: &RegionKey, id: u32) -> Result<EntryKey> {
    if !model.is_valid(region) {
        return Err(InvalidKey(format!("invalid region name '{region}'")).into());
    }
    let count = model.key_count(region);
    if id >= count {
        return Err(InvalidKey(format!("id {id} out of range 0..{count}")).into());
    }
    Ok(EntryKey::new(region.clone(), id))
}

/// Parses `A.B[...].suffix` into `DIMS` signed coordinates.
fn parse_grid_name<const DIMS: usize>(name: &str, suffix: &str) -> Option<[i32; DIMS]> {
    let mut parts = name.split('.');
    let mut coords = [0i32; DIMS];
    for slot in coords.iter_mut() {
        *slot = parse_signed(parts.next()?)?;
    }
    if parts.next()? != suffix || parts.next().is_some() {
        return None;
    }
    Some(coords)
}
