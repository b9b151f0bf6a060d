//! Process-wide table of stores held by a writable client.
//!
//! Backends that declare `single_writer` may have at most one writable client
//! per store. A [`WriterLease`] claims the store's key for as long as it is
//! alive.

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex, PoisonError};

use multisearch_core::{Error, Result};

static HELD: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on a store, released on drop.
#[derive(Debug)]
pub(crate) struct WriterLease {
    key: String,
}

impl WriterLease {
    /// Claim `key`.
    ///
    /// # Errors
    ///
    /// `ExclusiveLockHeld` when another lease holds it.
    pub(crate) fn acquire(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let mut held = HELD.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.clone()) {
            return Err(Error::ExclusiveLockHeld { store: key });
        }
        log::debug!("Acquired writer lease on {key}");
        Ok(Self { key })
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        HELD.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        log::debug!("Released writer lease on {}", self.key);
    }
}
