//! # Per-Scope Named Locks
//!
//! A keyed try-lock table. Acquisition never blocks: a busy scope fails
//! fast so the RPC can answer `ScopeUpdateOngoing` immediately. The guard
//! removes its entry on drop, so the table never grows beyond the set of
//! currently syncing scopes.

use dashmap::DashMap;
use std::sync::Arc;

/// Keyed try-lock table over scope ids.
#[derive(Clone, Default)]
pub struct ScopeLocks {
    held: Arc<DashMap<u64, ()>>,
}

impl ScopeLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the named lock for a scope.
    ///
    /// Returns `None` when another holder exists. The returned guard
    /// releases on drop, covering every exit path of the holder.
    #[must_use]
    pub fn try_acquire(&self, scope_id: u64) -> Option<ScopeLockGuard> {
        match self.held.entry(scope_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(());
                Some(ScopeLockGuard {
                    held: Arc::clone(&self.held),
                    scope_id,
                })
            }
        }
    }

    /// Whether a sync currently holds the scope's lock.
    #[must_use]
    pub fn is_locked(&self, scope_id: u64) -> bool {
        self.held.contains_key(&scope_id)
    }
}

/// Releases the named lock on drop.
pub struct ScopeLockGuard {
    held: Arc<DashMap<u64, ()>>,
    scope_id: u64,
}

impl Drop for ScopeLockGuard {
    fn drop(&mut self) {
        self.held.remove(&self.scope_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_fast() {
        let locks = ScopeLocks::new();
        let guard = locks.try_acquire(7);
        assert!(guard.is_some());
        assert!(locks.try_acquire(7).is_none());
        assert!(locks.is_locked(7));
    }

    #[test]
    fn test_drop_releases() {
        let locks = ScopeLocks::new();
        {
            let _guard = locks.try_acquire(7).unwrap();
        }
        assert!(!locks.is_locked(7));
        assert!(locks.try_acquire(7).is_some());
    }

    #[test]
    fn test_scopes_are_independent() {
        let locks = ScopeLocks::new();
        let _a = locks.try_acquire(1).unwrap();
        assert!(locks.try_acquire(2).is_some());
    }
}
