//! Per-store write locks shared across threads.
//!
//! The registry is built once at startup from every store location in use and
//! never mutated afterwards, so lookups need no outer lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Location of an in-memory store; never canonicalized.
pub const MEMORY_LOCATION: &str = ":memory:";

/// Canonical form of a store path, so different spellings of one file share a lock.
/// Falls back to the canonical parent joined with the file name when the file
/// does not exist yet, then to a plain absolute path.
pub fn canonical_location(path: &Path) -> PathBuf {
    if path == Path::new(MEMORY_LOCATION) {
        return path.to_path_buf();
    }
    if let Ok(p) = std::fs::canonicalize(path) {
        return p;
    }
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let canonical_parent = match parent {
        Some(parent) => std::fs::canonicalize(parent).ok(),
        None => std::env::current_dir().ok(),
    };
    match (canonical_parent, path.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

#[derive(Debug, Default)]
pub struct StoreLockRegistry {
    locks: HashMap<PathBuf, Mutex<()>>,
}

impl StoreLockRegistry {
    pub fn new<I, P>(locations: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let locks = locations
            .into_iter()
            .map(|p| (canonical_location(p.as_ref()), Mutex::new(())))
            .collect();
        Self { locks }
    }

    pub fn contains(&self, location: &Path) -> bool {
        self.locks.contains_key(&canonical_location(location))
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Holds the write lock for `location` until the guard drops.
    /// A lock poisoned by a panicking writer is still handed out.
    pub fn lock(&self, location: &Path) -> Option<MutexGuard<'_, ()>> {
        let mutex = self.locks.get(&canonical_location(location))?;
        Some(mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}
