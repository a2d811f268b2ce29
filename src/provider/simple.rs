//! # Simple Factories and the Uncached Provider
//!
//! [`SimpleRegionFactory`] opens inline region files for a key model;
//! [`ExtRegionFactory`] opens the matching sidecars. Both enumerate
//! existing regions by listing the save directory and filtering names
//! through the model.
//!
//! [`SimpleRegionProvider`] is the trivial provider: open, run, close.
//! Intended for one-shot maintenance work or as the inner layer of a
//! caching provider.

use std::fs;
use std::path::PathBuf;

use eyre::{Result, WrapErr};

use crate::key::{KeyModel, RegionKey};
use crate::region::{
    ExtRegion, HeaderProvider, Region, RegionFile, SpecialSectorEntry, TimestampResolution,
    EXT_DIR_SUFFIX,
};

use super::{RegionFactory, RegionKeys, RegionProvider};
use crate::config::DEFAULT_SECTOR_SIZE;

/// Opens inline [`RegionFile`]s for one save directory.
pub struct SimpleRegionFactory<M> {
    model: M,
    directory: PathBuf,
    sector_size: usize,
    header_template: Vec<Box<dyn HeaderProvider>>,
    specials: Vec<SpecialSectorEntry>,
}

impl<M: KeyModel + Clone + 'static> SimpleRegionFactory<M> {
    pub fn new(model: M, directory: impl Into<PathBuf>, sector_size: usize) -> Self {
        Self {
            model,
            directory: directory.into(),
            sector_size,
            header_template: Vec::new(),
            specials: Vec::new(),
        }
    }

    pub fn with_default_sector_size(model: M, directory: impl Into<PathBuf>) -> Self {
        Self::new(model, directory, DEFAULT_SECTOR_SIZE)
    }

    /// Adds an extra header column to every region this factory opens.
    pub fn with_header_provider(mut self, provider: Box<dyn HeaderProvider>) -> Self {
        self.header_template.push(provider);
        self
    }

    /// Adds the archetypal last-modified column.
    pub fn with_timestamps(self, resolution: TimestampResolution) -> Self {
        use crate::region::TimestampHeaderProvider;
        self.with_header_provider(Box::new(TimestampHeaderProvider::new(resolution)))
    }

    /// Registers a special sector-map value on every region this factory
    /// opens.
    pub fn with_special_entry(mut self, entry: SpecialSectorEntry) -> Self {
        self.specials.push(entry);
        self
    }

    /// The extra header columns, cloned for a sidecar factory that must
    /// match this one.
    pub fn header_template(&self) -> Vec<Box<dyn HeaderProvider>> {
        self.header_template.iter().map(|p| p.clone_box()).collect()
    }
}

impl<M: KeyModel + Clone + 'static> RegionFactory for SimpleRegionFactory<M> {
    fn get_region(&self, region: &RegionKey) -> Result<Box<dyn Region>> {
        let mut builder = RegionFile::builder()
            .directory(&self.directory)
            .region_key(region.clone())
            .key_count(self.model.key_count(region))
            .sector_size(self.sector_size);
        for provider in &self.header_template {
            builder = builder.add_header_provider(provider.clone_box());
        }
        for special in &self.specials {
            builder = builder.add_special_entry(special.clone());
        }
        Ok(Box::new(builder.open()?))
    }

    fn get_existing_region(&self, region: &RegionKey) -> Result<Option<Box<dyn Region>>> {
        if self.directory.join(region.name()).is_file() {
            Ok(Some(self.get_region(region)?))
        } else {
            Ok(None)
        }
    }

    fn all_regions(&self) -> Result<RegionKeys> {
        list_regions(&self.directory, self.model.clone(), |name, model| {
            RegionKey::new(name)
                .ok()
                .filter(|rk| model.is_valid(rk))
        })
    }
}

/// Opens [`ExtRegion`] sidecars for one save directory.
pub struct ExtRegionFactory<M> {
    model: M,
    directory: PathBuf,
    header_template: Vec<Box<dyn HeaderProvider>>,
}

impl<M: KeyModel + Clone + 'static> ExtRegionFactory<M> {
    pub fn new(model: M, directory: impl Into<PathBuf>) -> Self {
        Self {
            model,
            directory: directory.into(),
            header_template: Vec::new(),
        }
    }

    /// Header columns prefixed to each sidecar file, matching the inline
    /// tier's extra columns (the sector map column is inline-only).
    pub fn with_header_template(mut self, template: Vec<Box<dyn HeaderProvider>>) -> Self {
        self.header_template = template;
        self
    }
}

impl<M: KeyModel + Clone + 'static> RegionFactory for ExtRegionFactory<M> {
    fn get_region(&self, region: &RegionKey) -> Result<Box<dyn Region>> {
        let headers = self
            .header_template
            .iter()
            .map(|p| p.clone_box())
            .collect();
        Ok(Box::new(ExtRegion::open(
            &self.directory,
            region.clone(),
            self.model.key_count(region),
            headers,
        )?))
    }

    fn get_existing_region(&self, region: &RegionKey) -> Result<Option<Box<dyn Region>>> {
        let sidecar = self
            .directory
            .join(format!("{}{}", region.name(), EXT_DIR_SUFFIX));
        if sidecar.is_dir() {
            Ok(Some(self.get_region(region)?))
        } else {
            Ok(None)
        }
    }

    fn all_regions(&self) -> Result<RegionKeys> {
        list_regions(&self.directory, self.model.clone(), |name, model| {
            name.strip_suffix(EXT_DIR_SUFFIX)
                .and_then(|stem| RegionKey::new(stem).ok())
                .filter(|rk| model.is_valid(rk))
        })
    }
}

/// Lists a save directory and maps file names to region keys through
/// `accept`. A missing directory means no regions yet.
fn list_regions<M: KeyModel + Clone + 'static>(
    directory: &std::path::Path,
    model: M,
    accept: fn(&str, &M) -> Option<RegionKey>,
) -> Result<RegionKeys> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Box::new(std::iter::empty()))
        }
        Err(err) => {
            return Err(err)
                .wrap_err_with(|| format!("failed to list save directory '{}'", directory.display()))
        }
    };

    Ok(Box::new(entries.filter_map(move |entry| match entry {
        Ok(entry) => {
            let name = entry.file_name();
            accept(&name.to_string_lossy(), &model).map(Ok)
        }
        Err(err) => Some(Err(eyre::Report::new(err).wrap_err("failed to read save directory entry"))),
    })))
}

/// Opens a region per call and closes it before returning.
pub struct SimpleRegionProvider {
    factory: std::sync::Arc<dyn RegionFactory>,
}

impl SimpleRegionProvider {
    pub fn new(factory: std::sync::Arc<dyn RegionFactory>) -> Self {
        Self { factory }
    }
}

impl RegionProvider for SimpleRegionProvider {
    fn for_region(
        &self,
        region: &RegionKey,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<()> {
        let mut opened = self.factory.get_region(region)?;
        let result = f(opened.as_mut());
        let closed = opened.close();
        result.and(closed)
    }

    fn for_existing_region(
        &self,
        region: &RegionKey,
        f: &mut dyn FnMut(&mut dyn Region) -> Result<()>,
    ) -> Result<bool> {
        let mut opened = match self.factory.get_existing_region(region)? {
            Some(opened) => opened,
            None => return Ok(false),
        };
        let result = f(opened.as_mut());
        let closed = opened.close();
        result.and(closed).map(|_| true)
    }

    fn all_regions(&self) -> Result<RegionKeys> {
        self.factory.all_regions()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Grid2d;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn existing_region_is_none_before_any_write() {
        let dir = tempdir().unwrap();
        let factory = SimpleRegionFactory::new(Grid2d, dir.path(), 512);

        let rk = RegionKey::new("0.0.2dr").unwrap();

        assert!(factory.get_existing_region(&rk).unwrap().is_none());
        factory.get_region(&rk).unwrap();
        assert!(factory.get_existing_region(&rk).unwrap().is_some());
    }

    #[test]
    fn all_regions_filters_through_the_model() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("0.0.2dr"), b"").unwrap();
        std::fs::write(dir.path().join("-3.12.2dr"), b"").unwrap();
        std::fs::write(dir.path().join("junk.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("0.0.2dr.ext")).unwrap();

        let factory = SimpleRegionFactory::new(Grid2d, dir.path(), 512);
        let mut names: Vec<String> = factory
            .all_regions()
            .unwrap()
            .map(|r| r.unwrap().name().to_string())
            .collect();
        names.sort();

        assert_eq!(names, vec!["-3.12.2dr", "0.0.2dr"]);
    }

    #[test]
    fn ext_factory_lists_sidecar_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("0.0.2dr.ext")).unwrap();
        std::fs::create_dir(dir.path().join("1.-2.2dr.ext")).unwrap();
        std::fs::write(dir.path().join("0.0.2dr"), b"").unwrap();

        let factory = ExtRegionFactory::new(Grid2d, dir.path());
        let mut names: Vec<String> = factory
            .all_regions()
            .unwrap()
            .map(|r| r.unwrap().name().to_string())
            .collect();
        names.sort();

        assert_eq!(names, vec!["0.0.2dr", "1.-2.2dr"]);
    }

    #[test]
    fn all_regions_of_a_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let factory =
            SimpleRegionFactory::new(Grid2d, dir.path().join("not-created-yet"), 512);

        assert_eq!(factory.all_regions().unwrap().count(), 0);
    }

    #[test]
    fn simple_provider_roundtrips_through_fresh_handles() {
        let dir = tempdir().unwrap();
        let provider = SimpleRegionProvider::new(Arc::new(SimpleRegionFactory::new(
            Grid2d,
            dir.path(),
            512,
        )));
        let key = Grid2d.key(1, 2);

        provider
            .for_region(key.region_key(), &mut |r| r.write(&key, Some(b"through")))
            .unwrap();

        let mut value = None;
        let entered = provider
            .for_existing_region(key.region_key(), &mut |r| {
                value = r.read(&key)?;
                Ok(())
            })
            .unwrap();
        assert!(entered);
        assert_eq!(value.unwrap(), b"through");
    }

    #[test]
    fn for_existing_region_reports_absent_regions() {
        let dir = tempdir().unwrap();
        let provider = SimpleRegionProvider::new(Arc::new(SimpleRegionFactory::new(
            Grid2d,
            dir.path(),
            512,
        )));
        let rk = RegionKey::new("5.5.2dr").unwrap();

        let entered = provider.for_existing_region(&rk, &mut |_| Ok(())).unwrap();

        assert!(!entered);
    }
}
