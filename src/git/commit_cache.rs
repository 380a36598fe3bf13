//! git::commit_cache
//!
//! Shared branch-tip cache with explicit invalidation.
//!
//! Integration-branch lookups during patchset preparation are served
//! from this cache. Entries are keyed by `(repository, ref)`; the
//! executor records the new tip whenever a branch moves, and the
//! validator invalidates *synchronously* when a branch is rewound or
//! deleted, before the batch commits. A concurrent reader therefore
//! never observes a cached tip for a ref whose past is about to change.
//!
//! The cache holds tips only, not commit bodies: a hit means "this tip
//! is current", and a changed tip is recorded over the old entry. That
//! keeps plain fast-forwards correct without any extra signal.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::types::Oid;

/// Key: repository name + fully-qualified ref.
type Key = (String, String);

/// A concurrency-safe map of cached branch tips.
#[derive(Debug, Default)]
pub struct CommitCache {
    entries: RwLock<HashMap<Key, Oid>>,
}

impl CommitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached tip for a ref, if present.
    pub fn tip(&self, repository: &str, refname: &str) -> Option<Oid> {
        self.entries
            .read()
            .expect("commit cache lock poisoned")
            .get(&(repository.to_string(), refname.to_string()))
            .cloned()
    }

    /// Record the tip for a ref.
    pub fn record(&self, repository: &str, refname: &str, tip: Oid) {
        self.entries
            .write()
            .expect("commit cache lock poisoned")
            .insert((repository.to_string(), refname.to_string()), tip);
    }

    /// Drop the entry for a single ref. Called on rewind and delete.
    pub fn invalidate(&self, repository: &str, refname: &str) {
        self.entries
            .write()
            .expect("commit cache lock poisoned")
            .remove(&(repository.to_string(), refname.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(n: u8) -> Oid {
        Oid::new(format!("{:040x}", n)).unwrap()
    }

    #[test]
    fn record_and_invalidate_single_ref() {
        let cache = CommitCache::new();
        cache.record("demo.git", "refs/heads/main", oid(1));
        assert_eq!(cache.tip("demo.git", "refs/heads/main"), Some(oid(1)));

        cache.invalidate("demo.git", "refs/heads/main");
        assert_eq!(cache.tip("demo.git", "refs/heads/main"), None);
    }

    #[test]
    fn invalidation_spares_other_refs() {
        let cache = CommitCache::new();
        cache.record("a.git", "refs/heads/main", oid(1));
        cache.record("b.git", "refs/heads/main", oid(2));

        cache.invalidate("a.git", "refs/heads/main");
        assert_eq!(cache.tip("a.git", "refs/heads/main"), None);
        assert_eq!(cache.tip("b.git", "refs/heads/main"), Some(oid(2)));
    }
}
