//! # Extra Header Columns
//!
//! Beyond the mandatory sector-map column, a region header may carry extra
//! fixed-width columns: one entry per id, columns laid out back to back in
//! registration order. A [`HeaderProvider`] supplies one column's width
//! and the bytes for a given key; the region rewrites a key's entry in
//! every column whenever that key is touched.
//!
//! The sidecar tier reuses the same providers: an ext file starts with the
//! concatenated column entries for its id (sector map excluded), then the
//! payload.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::key::EntryKey;

/// One fixed-width header column.
pub trait HeaderProvider: Send + Sync {
    /// Width of one entry of this column, in bytes.
    fn byte_count(&self) -> usize;

    /// Writes the entry for `key` into `out` (`out.len() == byte_count()`).
    fn write_entry(&self, key: &EntryKey, out: &mut [u8]);

    /// Clones the provider for another region opened by the same factory.
    fn clone_box(&self) -> Box<dyn HeaderProvider>;
}

/// Unit of the [`TimestampHeaderProvider`] column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampResolution {
    Seconds,
    Millis,
}

/// The archetypal last-modified column: 4 bytes per id, big-endian Unix
/// time truncated to 32 bits, stamped on every header rewrite for the
/// touched id.
#[derive(Debug, Clone, Copy)]
pub struct TimestampHeaderProvider {
    resolution: TimestampResolution,
}

impl TimestampHeaderProvider {
    pub fn new(resolution: TimestampResolution) -> Self {
        Self { resolution }
    }

    fn now(&self) -> u32 {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        match self.resolution {
            TimestampResolution::Seconds => elapsed.as_secs() as u32,
            TimestampResolution::Millis => elapsed.as_millis() as u32,
        }
    }
}

impl HeaderProvider for TimestampHeaderProvider {
    fn byte_count(&self) -> usize {
        4
    }

    fn write_entry(&self, _key: &EntryKey, out: &mut [u8]) {
        out.copy_from_slice(&self.now().to_be_bytes());
    }

    fn clone_box(&self) -> Box<dyn HeaderProvider> {
        Box::new(*self)
    }
}
