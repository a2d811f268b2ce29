//! # Region Store
//!
//! `RegionStore` is the user-facing key-value surface: put/get/delete over
//! opaque byte payloads, backed by an ordered chain of region providers.
//! The typical chain is `[inline, sidecar]`: values the inline format can
//! hold live in region files, larger ones fall through to `.ext` sidecar
//! directories.
//!
//! ## The Fallback Protocol
//!
//! A put walks the chain in order. A tier that rejects the value with
//! `UnsupportedData` also erases any stale copy it may hold; the first
//! tier that accepts it demotes the remaining walk to erases, so that at
//! most one tier holds a key once writes quiesce. Readers rely on that
//! single-holder invariant. If every tier rejects, the put fails with a
//! [`StorageError`] wrapping the per-tier causes.
//!
//! A get walks the same order and returns the first hit. Without region
//! creation, a tier whose region file does not exist ends the walk early:
//! every put opens the first tier's region before anything else, so an
//! absent first-tier region proves the key was never written. A region
//! that exists but lacks the key falls through to the next tier.
//!
//! ## Batching
//!
//! `put_many` groups keys by region and runs each (region, tier) batch
//! inside a single exclusive acquisition. Keys that every tier rejected
//! stay in the caller's map; everything else is written and removed from
//! it.

mod anvil;
mod spatial;

pub use anvil::AnvilStore;
pub use spatial::SpatialStore;

use std::collections::{HashMap as StdHashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::error::{AlreadyClosed, MultiUnsupportedData, StorageError, UnsupportedData};
use crate::key::{EntryKey, RegionKey};
use crate::provider::{RegionKeys, RegionProvider};

pub struct RegionStore {
    providers: Vec<Arc<dyn RegionProvider>>,
    closed: AtomicBool,
}

impl RegionStore {
    /// A store over an ordered fallback chain of providers.
    pub fn new(providers: Vec<Arc<dyn RegionProvider>>) -> Self {
        debug_assert!(!providers.is_empty(), "a store needs at least one provider");
        Self {
            providers,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AlreadyClosed.into());
        }
        Ok(())
    }

    /// Stores `value` at `key` in the first tier that accepts it, erasing
    /// stale copies everywhere else.
    pub fn put(&self, key: &EntryKey, value: &[u8]) -> Result<()> {
        self.check_open()?;
        let mut pending: Option<&[u8]> = Some(value);
        let mut causes: Vec<UnsupportedData> = Vec::new();

        for provider in &self.providers {
            let attempt = pending;
            let mut rejected: Option<UnsupportedData> = None;
            provider.for_region(key.region_key(), &mut |region| {
                match region.write(key, attempt) {
                    Ok(()) => Ok(()),
                    Err(err) => match err.downcast::<UnsupportedData>() {
                        Ok(unsupported) => {
                            debug!(%key, reason = unsupported.reason(), "tier rejected value, erasing stale copy");
                            rejected = Some(unsupported);
                            // keep no stale content on the tier that rejected
                            region.write(key, None)
                        }
                        Err(other) => Err(other),
                    },
                }
            })?;
            match rejected {
                Some(cause) => causes.push(cause),
                None => {
                    causes.clear();
                    pending = None;
                }
            }
        }

        if causes.is_empty() {
            Ok(())
        } else {
            Err(StorageError::new(
                format!("no provider could store {key} ({} bytes)", value.len()),
                causes
                    .into_iter()
                    .map(|c| Box::new(c) as Box<dyn std::error::Error + Send + Sync>)
                    .collect(),
            )
            .into())
        }
    }

    /// Erases `key` on every tier.
    pub fn delete(&self, key: &EntryKey) -> Result<()> {
        self.check_open()?;
        for provider in &self.providers {
            provider.for_region(key.region_key(), &mut |region| region.write(key, None))?;
        }
        Ok(())
    }

    /// Stores a batch, grouped by region so each (region, tier) pair is
    /// entered exactly once. Written keys are removed from `entries`;
    /// rejected keys remain, and a [`StorageError`] aggregating their
    /// causes is returned if there are any.
    pub fn put_many(&self, entries: &mut StdHashMap<EntryKey, Vec<u8>>) -> Result<()> {
        self.check_open()?;

        let mut by_region: HashMap<RegionKey, Vec<EntryKey>> = HashMap::new();
        for key in entries.keys() {
            by_region
                .entry(key.region_key().clone())
                .or_default()
                .push(key.clone());
        }

        let mut written: HashSet<EntryKey> = HashSet::new();
        let mut failures: HashMap<EntryKey, Vec<UnsupportedData>> = HashMap::new();

        for (region, keys) in &by_region {
            for provider in &self.providers {
                let batch: Vec<(&EntryKey, Option<&[u8]>)> = keys
                    .iter()
                    .map(|key| {
                        let value = if written.contains(key) {
                            None
                        } else {
                            entries.get(key).map(|v| v.as_slice())
                        };
                        (key, value)
                    })
                    .collect();

                let mut rejected: Option<MultiUnsupportedData> = None;
                provider.for_region(region, &mut |r| match r.write_many(&batch) {
                    Ok(()) => Ok(()),
                    Err(err) => match err.downcast::<MultiUnsupportedData>() {
                        Ok(multi) => {
                            // erase the rejected keys on this tier too
                            let nulls: Vec<(&EntryKey, Option<&[u8]>)> =
                                multi.children().keys().map(|k| (k, None)).collect();
                            r.write_many(&nulls)?;
                            rejected = Some(multi);
                            Ok(())
                        }
                        Err(other) => Err(other),
                    },
                })?;

                let rejected = rejected.map(|m| m.into_children()).unwrap_or_default();
                for key in keys {
                    if written.contains(key) {
                        continue;
                    }
                    if let Some(cause) = rejected.get(key) {
                        failures.entry(key.clone()).or_default().push(cause.clone());
                    } else {
                        failures.remove(key);
                        written.insert(key.clone());
                    }
                }
            }
        }

        for key in &written {
            entries.remove(key);
        }

        if failures.is_empty() {
            return Ok(());
        }
        let causes = failures
            .into_iter()
            .map(|(key, causes)| {
                let size = entries.get(&key).map(|v| v.len()).unwrap_or(0);
                Box::new(StorageError::new(
                    format!("no provider could store {key} ({size} bytes)"),
                    causes
                        .into_iter()
                        .map(|c| Box::new(c) as Box<dyn std::error::Error + Send + Sync>)
                        .collect(),
                )) as Box<dyn std::error::Error + Send + Sync>
            })
            .collect();
        Err(StorageError::new("multiple write errors", causes).into())
    }

    /// Reads `key`, walking the tiers in order. With `create_region` the
    /// region files are created (and cached) as a side effect, which is
    /// the preferred mode for hot paths.
    pub fn get(&self, key: &EntryKey, create_region: bool) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        for provider in &self.providers {
            let mut value: Option<Vec<u8>> = None;
            if create_region {
                provider.for_region(key.region_key(), &mut |region| {
                    value = region.read(key)?;
                    Ok(())
                })?;
            } else {
                let entered = provider.for_existing_region(key.region_key(), &mut |region| {
                    value = region.read(key)?;
                    Ok(())
                })?;
                if !entered {
                    // a never-created region proves the key was never
                    // written: every put opens this tier's region first
                    return Ok(None);
                }
            }
            if value.is_some() {
                return Ok(value);
            }
        }
        Ok(None)
    }

    /// Whether any tier holds `key`.
    pub fn has(&self, key: &EntryKey) -> Result<bool> {
        self.check_open()?;
        for provider in &self.providers {
            let mut found = false;
            provider.for_existing_region(key.region_key(), &mut |region| {
                found = region.has(key)?;
                Ok(())
            })?;
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Lazily iterates every stored key. With `ensure_unique`, a key held
    /// by several tiers (possible only transiently) is reported once, at
    /// the cost of a presence probe per key against the earlier tiers.
    pub fn all_keys(&self, ensure_unique: bool) -> Keys<'_> {
        Keys(ProviderKeys::new(self, ensure_unique))
    }

    /// Lazily iterates `(key, value)` pairs. Keys written or erased while
    /// iterating may be skipped or duplicated.
    pub fn all_entries(&self, ensure_unique: bool) -> Entries<'_> {
        Entries(ProviderKeys::new(self, ensure_unique))
    }

    /// Flushes every tier.
    pub fn flush(&self) -> Result<()> {
        self.check_open()?;
        for provider in &self.providers {
            provider.flush()?;
        }
        Ok(())
    }

    /// Closes every tier. The first error is returned after all tiers
    /// were given the chance to close.
    pub fn close(&self) -> Result<()> {
        self.check_open()?;
        self.closed.store(true, Ordering::Release);
        let mut first_error = None;
        for provider in &self.providers {
            if let Err(err) = provider.close() {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::warn!(error = %err, "suppressed provider close error");
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn present_before(&self, provider_idx: usize, key: &EntryKey) -> Result<bool> {
        for provider in &self.providers[..provider_idx] {
            let mut found = false;
            provider.for_existing_region(key.region_key(), &mut |region| {
                found = region.has(key)?;
                Ok(())
            })?;
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read_at(&self, provider_idx: usize, key: &EntryKey) -> Result<Option<Vec<u8>>> {
        let mut value = None;
        self.providers[provider_idx].for_existing_region(key.region_key(), &mut |region| {
            value = region.read(key)?;
            Ok(())
        })?;
        Ok(value)
    }
}

/// Walks providers in order, buffering one region's keys at a time. The
/// provider index travels with each key so entry iteration can read the
/// value from the tier that reported it.
struct ProviderKeys<'a> {
    store: &'a RegionStore,
    ensure_unique: bool,
    provider_idx: usize,
    regions: Option<RegionKeys>,
    pending: VecDeque<EntryKey>,
    done: bool,
}

impl<'a> ProviderKeys<'a> {
    fn new(store: &'a RegionStore, ensure_unique: bool) -> Self {
        Self {
            store,
            ensure_unique,
            provider_idx: 0,
            regions: None,
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn next_key(&mut self) -> Option<Result<(usize, EntryKey)>> {
        if self.done {
            return None;
        }
        loop {
            if let Some(key) = self.pending.pop_front() {
                if self.ensure_unique && self.provider_idx > 0 {
                    match self.store.present_before(self.provider_idx, &key) {
                        Ok(true) => continue,
                        Ok(false) => {}
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err));
                        }
                    }
                }
                return Some(Ok((self.provider_idx, key)));
            }

            if self.provider_idx >= self.store.providers.len() {
                self.done = true;
                return None;
            }

            let regions = match self.regions {
                Some(ref mut regions) => regions,
                None => match self.store.providers[self.provider_idx].all_regions() {
                    Ok(iter) => self.regions.insert(iter),
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                },
            };

            match regions.next() {
                Some(Ok(region)) => {
                    let provider = &self.store.providers[self.provider_idx];
                    let pending = &mut self.pending;
                    let listed = provider.for_existing_region(&region, &mut |r| {
                        r.for_each_key(&mut |key| {
                            pending.push_back(key);
                            Ok(())
                        })
                    });
                    if let Err(err) = listed {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.regions = None;
                    self.provider_idx += 1;
                }
            }
        }
    }
}

/// Iterator returned by [`RegionStore::all_keys`].
pub struct Keys<'a>(ProviderKeys<'a>);

impl Iterator for Keys<'_> {
    type Item = Result<EntryKey>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_key().map(|item| item.map(|(_, key)| key))
    }
}

/// Iterator returned by [`RegionStore::all_entries`].
pub struct Entries<'a>(ProviderKeys<'a>);

impl Iterator for Entries<'_> {
    type Item = Result<(EntryKey, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.0.next_key()? {
                Ok((provider_idx, key)) => match self.0.store.read_at(provider_idx, &key) {
                    Ok(Some(value)) => return Some(Ok((key, value))),
                    // erased while iterating
                    Ok(None) => continue,
                    Err(err) => return Some(Err(err)),
                },
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
