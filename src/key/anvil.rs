//! # Anvil Key Model
//!
//! Region naming used by the Minecraft Anvil chunk format: `r.X.Z.mca`
//! (or `r.X.Z.mcr` for the older variant). Regions are 32x32 chunks like
//! [`Grid2d`](super::Grid2d), but the id packs the axes the other way
//! around: `(z & 31) << 5 | (x & 31)`. The two conventions have been mixed
//! up historically, so each is pinned by a test in its own module.

use eyre::Result;

use super::{parse_signed, EntryKey, KeyModel, RegionKey};
use crate::error::InvalidKey;

const LOC_BITS: u32 = 5;
const LOC_MASK: i32 = (1 << LOC_BITS) - 1;

/// Entries per Anvil region (32 * 32 chunks).
pub const ENTRIES_PER_ANVIL_REGION: u32 = 1 << (2 * LOC_BITS);

/// Anvil chunk key model (`r.X.Z.mca` / `r.X.Z.mcr`).
#[derive(Debug, Clone)]
pub struct McAnvil {
    extension: &'static str,
}

impl McAnvil {
    /// The modern `.mca` naming.
    pub fn mca() -> Self {
        Self { extension: "mca" }
    }

    /// The legacy `.mcr` naming.
    pub fn mcr() -> Self {
        Self { extension: "mcr" }
    }

    /// Entry key for chunk `(x, z)`.
    pub fn key(&self, x: i32, z: i32) -> EntryKey {
        let name = format!("r.{}.{}.{}", x >> LOC_BITS, z >> LOC_BITS, self.extension);
        // INVARIANT: digits, '-' and '.' are always filesystem safe
        let region = RegionKey::new(name).expect("anvil region name is always valid");
        let id = (((z & LOC_MASK) << LOC_BITS) | (x & LOC_MASK)) as u32;
        EntryKey::new(region, id)
    }

    /// Chunk position of an entry key produced by this model.
    pub fn coords(&self, key: &EntryKey) -> Result<(i32, i32)> {
        let (rx, rz) = self
            .parse_name(key.region_key().name())
            .ok_or_else(|| InvalidKey(format!("invalid anvil region name '{}'", key.region_key())))?;
        let id = key.id() as i32;
        Ok((
            (rx << LOC_BITS) | (id & LOC_MASK),
            (rz << LOC_BITS) | (id >> LOC_BITS),
        ))
    }

    fn parse_name(&self, name: &str) -> Option<(i32, i32)> {
        let mut parts = name.split('.');
        if parts.next()? != "r" {
            return None;
        }
        let x = parse_signed(parts.next()?)?;
        let z = parse_signed(parts.next()?)?;
        if parts.next()? != self.extension || parts.next().is_some() {
            return None;
        }
        Some((x, z))
    }
}

impl KeyModel for McAnvil {
    fn key_count(&self, _region: &RegionKey) -> u32 {
        ENTRIES_PER_ANVIL_REGION
    }

    fn is_valid(&self, region: &RegionKey) -> bool {
        self.parse_name(region.name()).is_some()
    }

    fn from_region_and_id(&self, region: &RegionKey, id: u32) -> Result<EntryKey> {
        if !self.is_valid(region) {
            return Err(InvalidKey(format!("invalid region name '{region}'")).into());
        }
        if id >= ENTRIES_PER_ANVIL_REGION {
            return Err(
                InvalidKey(format!("id {id} out of range 0..{ENTRIES_PER_ANVIL_REGION}")).into(),
            );
        }
        Ok(EntryKey::new(region.clone(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anvil_packs_z_into_the_high_bits() {
        // the reverse of Grid2d; this convention is pinned
        let key = McAnvil::mca().key(1, 2);

        assert_eq!(key.region_key().name(), "r.0.0.mca");
        assert_eq!(key.id(), (2 << 5) | 1);
    }

    #[test]
    fn anvil_region_names_carry_the_r_prefix() {
        assert_eq!(McAnvil::mca().key(-1, 40).region_key().name(), "r.-1.1.mca");
        assert_eq!(McAnvil::mcr().key(0, 0).region_key().name(), "r.0.0.mcr");
    }

    #[test]
    fn anvil_coords_roundtrip() {
        let model = McAnvil::mca();
        for &(x, z) in &[(0, 0), (-1, -1), (1000, -47)] {
            let key = model.key(x, z);
            assert_eq!(model.coords(&key).unwrap(), (x, z));
        }
    }

    #[test]
    fn anvil_validates_extension_per_variant() {
        let mca = RegionKey::new("r.0.0.mca").unwrap();
        let mcr = RegionKey::new("r.0.0.mcr").unwrap();

        assert!(McAnvil::mca().is_valid(&mca));
        assert!(!McAnvil::mca().is_valid(&mcr));
        assert!(McAnvil::mcr().is_valid(&mcr));
    }
}
