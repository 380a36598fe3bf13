//! git
//!
//! Git access for the receive pipeline.
//!
//! [`interface::Git`] is the single doorway to the object and ref store;
//! [`commit_cache::CommitCache`] is the shared branch-commit cache with
//! explicit invalidation.

pub mod commit_cache;
pub mod interface;

pub use commit_cache::CommitCache;
pub use interface::{
    CommitGraph, CommitInfo, DiffStat, Git, GitError, Identity, RefTarget, RefUpdateOutcome,
};
