use crate::normalize::normalize_line;
use crate::{IndexerError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Occurrence counts per normalized key for the current flush window.
///
/// The lock is held only for a single increment or for swapping the whole
/// map out, never while records are built from a drained window.
#[derive(Debug, Default)]
pub struct RepeatCache {
    counts: Mutex<HashMap<String, usize>>,
}

impl RepeatCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, usize>>> {
        self.counts
            .lock()
            .map_err(|_| IndexerError::LockPoisoned("repeat cache"))
    }

    /// Normalize `raw` and count it. Returns `false` (and counts nothing) when
    /// the line normalizes to an empty key.
    pub fn record_line(&self, raw: &str) -> Result<bool> {
        let key = normalize_line(raw);
        if key.is_empty() {
            return Ok(false);
        }
        self.increment(key)?;
        Ok(true)
    }

    pub fn increment(&self, key: String) -> Result<()> {
        *self.lock()?.entry(key).or_insert(0) += 1;
        Ok(())
    }

    /// Take the current window, leaving an empty map in its place.
    pub fn drain(&self) -> Result<HashMap<String, usize>> {
        Ok(std::mem::take(&mut *self.lock()?))
    }

    /// `(distinct keys, total lines)` accumulated in the current window.
    pub fn pending(&self) -> Result<(usize, usize)> {
        let guard = self.lock()?;
        Ok((guard.len(), guard.values().sum()))
    }
}
