//! Process-wide table of open virtual files, keyed by file handle.
//!
//! The handle is the description file's own descriptor, which is unique
//! for as long as it stays open, so duplicates cannot arise. One mutex
//! serializes every mutation; lookups hand out an `Arc` clone so the read
//! engine runs without holding the lock. The dispatch layer serializes
//! operations per handle, which is what makes a lookup safe against a
//! concurrent removal of the same key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::vfile::VirtualFile;

/// Mapping from open handle to its virtual file.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<HashMap<u64, Arc<VirtualFile>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<VirtualFile>>> {
        // a poisoned table is still structurally sound
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers `file` under `fh`. Handles are unique while open, so an
    /// existing entry can only be a leak from a missed release; it gets
    /// replaced.
    pub fn insert(&self, fh: u64, file: VirtualFile) {
        self.table().insert(fh, Arc::new(file));
    }

    /// Shared reference to the virtual file registered under `fh`.
    #[must_use]
    pub fn find(&self, fh: u64) -> Option<Arc<VirtualFile>> {
        self.table().get(&fh).cloned()
    }

    /// Detaches the entry for `fh`, transferring ownership to the caller.
    /// The backing descriptors close when the last reference drops.
    #[must_use]
    pub fn remove(&self, fh: u64) -> Option<Arc<VirtualFile>> {
        self.table().remove(&fh)
    }

    /// Number of currently registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
