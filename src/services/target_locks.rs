//! One in-flight sync per target.
//!
//! A target is a repository or a feature request. Acquiring returns a guard;
//! dropping the guard (normally, on error, or while unwinding) frees the
//! target again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Kind of sync target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Repository,
    Feature,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repository => write!(f, "repository"),
            Self::Feature => write!(f, "feature"),
        }
    }
}

/// Lock key: `(kind, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub kind: TargetKind,
    pub id: i64,
}

impl TargetKey {
    pub fn repository(id: i64) -> Self {
        Self {
            kind: TargetKind::Repository,
            id,
        }
    }

    pub fn feature(id: i64) -> Self {
        Self {
            kind: TargetKind::Feature,
            id,
        }
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Shared set of targets with a sync in flight.
#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    held: Arc<Mutex<HashSet<TargetKey>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `key`. `None` if another sync holds it.
    pub fn try_acquire(&self, key: TargetKey) -> Option<TargetGuard> {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if held.insert(key) {
            Some(TargetGuard {
                held: Arc::clone(&self.held),
                key,
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, key: TargetKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&key)
    }
}

/// Releases its target on drop.
#[derive(Debug)]
pub struct TargetGuard {
    held: Arc<Mutex<HashSet<TargetKey>>>,
    key: TargetKey,
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.key);
    }
}
