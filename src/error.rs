//! # Error Types
//!
//! Fallible operations across the crate return `eyre::Result`. The error
//! values defined here are the typed subset that callers (and the store's
//! own fallback logic) need to recognize programmatically; they are carried
//! inside `eyre::Report` and recovered with `downcast_ref`.
//!
//! ## Recovery Semantics
//!
//! - [`UnsupportedData`] means a storage tier cannot hold a value (too large
//!   for the inline format, sector offset overflow, sidecar file too big).
//!   The store catches it and falls back to the next provider in its chain.
//! - [`MultiUnsupportedData`] is the batched form raised by `write_many`.
//! - [`CorruptedData`] is fatal for the read that hit it but does not take
//!   the region down; it is never silently recovered.
//! - [`InvalidKey`] is a programmer error from a key model.
//! - [`AlreadyClosed`] is API misuse on a closed provider or store.
//! - [`StorageError`] is the aggregate raised when no provider in the chain
//!   could accept a value; it wraps the per-tier `UnsupportedData` causes.

use std::fmt;

use hashbrown::HashMap;
use thiserror::Error;

use crate::key::EntryKey;

/// A storage tier cannot hold this value.
#[derive(Debug, Clone, Error)]
#[error("unsupported data: {reason} (size {size})")]
pub struct UnsupportedData {
    reason: String,
    size: u64,
}

impl UnsupportedData {
    pub fn new(reason: impl Into<String>, size: u64) -> Self {
        Self {
            reason: reason.into(),
            size,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Batched form of [`UnsupportedData`], raised by `write_many` with one
/// child per rejected key. Keys absent from the map were written.
#[derive(Debug, Clone)]
pub struct MultiUnsupportedData {
    children: HashMap<EntryKey, UnsupportedData>,
}

impl MultiUnsupportedData {
    pub fn new(children: HashMap<EntryKey, UnsupportedData>) -> Self {
        Self { children }
    }

    pub fn children(&self) -> &HashMap<EntryKey, UnsupportedData> {
        &self.children
    }

    pub fn into_children(self) -> HashMap<EntryKey, UnsupportedData> {
        self.children
    }
}

impl fmt::Display for MultiUnsupportedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write rejected for {} entries", self.children.len())
    }
}

impl std::error::Error for MultiUnsupportedData {}

/// On-disk state is inconsistent: a stored length exceeds the sector
/// capacity recorded for it, or an entry points outside the file.
#[derive(Debug, Clone, Copy, Error)]
#[error("corrupted data: expected at most {expected} bytes but found {found}")]
pub struct CorruptedData {
    pub expected: u64,
    pub found: u64,
}

/// A region name or entry id rejected by a key model.
#[derive(Debug, Clone, Error)]
#[error("invalid key: {0}")]
pub struct InvalidKey(pub String);

/// Operation attempted on a closed provider or store.
#[derive(Debug, Clone, Copy, Error)]
#[error("already closed")]
pub struct AlreadyClosed;

/// Aggregate error raised by the store when every provider in the fallback
/// chain rejected a value. The causes are the per-tier errors, numbered in
/// the order the tiers were tried.
#[derive(Debug)]
pub struct StorageError {
    description: String,
    causes: Vec<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    pub fn new(
        description: impl Into<String>,
        causes: Vec<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            description: description.into(),
            causes,
        }
    }

    pub fn causes(&self) -> &[Box<dyn std::error::Error + Send + Sync>] {
        &self.causes
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)?;
        let total = self.causes.len();
        for (i, cause) in self.causes.iter().enumerate() {
            write!(f, "\ncause {}/{}: {}", i + 1, total, cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {}
