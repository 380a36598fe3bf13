//! git::interface
//!
//! Git interface implementation using git2.
//!
//! This module provides the **single doorway** to all Git operations in
//! the receive pipeline. No other module imports `git2` directly. This
//! ensures:
//!
//! - Consistent error handling across all Git operations
//! - Strong type guarantees at the boundary
//! - CAS (compare-and-swap) semantics for all ref mutations
//!
//! # Concurrency
//!
//! Commit-graph walks (ancestry tests, rev-lists, diff stats) operate on
//! immutable object data and may run concurrently from many pushes. Ref
//! mutations are serialized by the underlying ref store's per-ref lock;
//! a lost race surfaces as [`GitError::CasFailed`] or
//! [`GitError::LockFailure`], never as a silent overwrite.
//!
//! # Example
//!
//! ```ignore
//! use cairn::git::Git;
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("/srv/git/demo.git"))?;
//! let tip = git.resolve_ref("refs/heads/main")?;
//! println!("main is at {}", tip.short(7));
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::{Oid, TypeError};

/// Errors from Git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Not a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was opened
        path: PathBuf,
    },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound {
        /// The ref that was not found
        refname: String,
    },

    /// Compare-and-swap precondition failed.
    ///
    /// The ref's current value did not match the expected prior value.
    /// This is the loser's side of two pushes racing on one ref.
    #[error("CAS failed for {refname}: expected {expected}, found {actual}")]
    CasFailed {
        /// The ref being updated
        refname: String,
        /// The expected old value
        expected: String,
        /// The actual current value
        actual: String,
    },

    /// Could not take the ref lock.
    #[error("failed to lock {refname}: {message}")]
    LockFailure {
        /// The ref being locked
        refname: String,
        /// Lock error detail
        message: String,
    },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound {
        /// The OID that was not found
        oid: String,
    },

    /// Invalid object id format.
    #[error("invalid object id: {0}")]
    InvalidOid(#[from] TypeError),

    /// Internal git2 error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl GitError {
    /// Create a GitError from a git2::Error with context about what was
    /// being resolved.
    fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound if context.starts_with("refs/") => {
                GitError::RefNotFound {
                    refname: context.to_string(),
                }
            }
            git2::ErrorCode::NotFound => GitError::ObjectNotFound {
                oid: context.to_string(),
            },
            git2::ErrorCode::Locked => GitError::LockFailure {
                refname: context.to_string(),
                message: err.message().to_string(),
            },
            _ => GitError::Internal {
                message: format!("{context}: {}", err.message()),
            },
        }
    }
}

/// Committer/author identity on a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Parsed commit metadata.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub oid: Oid,
    pub author: Identity,
    pub committer: Identity,
    /// First line of the message, trimmed.
    pub title: String,
    /// Full message.
    pub message: String,
    pub parents: Vec<Oid>,
}

impl CommitInfo {
    /// The message body: everything after the first paragraph, with
    /// leading/trailing whitespace trimmed.
    pub fn body(&self) -> String {
        match self.message.split_once("\n\n") {
            Some((_, body)) => body.trim().to_string(),
            None => String::new(),
        }
    }

    pub fn first_parent(&self) -> Option<&Oid> {
        self.parents.first()
    }
}

/// Insertion/deletion counts between two trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStat {
    pub insertions: usize,
    pub deletions: usize,
}

/// A resolved ref entry.
#[derive(Debug, Clone)]
pub struct RefTarget {
    pub name: String,
    pub oid: Oid,
}

/// Outcome of one ref update inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdateOutcome {
    Applied,
    /// The CAS precondition failed or the lock could not be taken.
    Locked(String),
}

/// Read-only commit-graph queries.
///
/// This is the seam between the patchset classifier and the repository:
/// production code passes [`Git`], unit tests pass a mock graph.
pub trait CommitGraph {
    /// True if `ancestor` is reachable from `descendant`.
    fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError>;

    /// Count commits reachable from `tip` but not from `base`.
    fn commit_count(&self, base: &Oid, tip: &Oid) -> Result<usize, GitError>;

    /// Diff statistics between the trees of `base` and `tip`.
    fn diff_stat(&self, base: &Oid, tip: &Oid) -> Result<DiffStat, GitError>;
}

/// The Git interface.
///
/// Wraps a `git2::Repository` opened on the server-side (bare)
/// repository receiving the push.
pub struct Git {
    repo: git2::Repository,
}

impl Git {
    /// Open a repository at the given path.
    ///
    /// Server repositories are bare; non-bare repositories open fine
    /// here and are rejected later by push policy, which owns that rule.
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::open(path).map_err(|_| GitError::NotARepo {
            path: path.to_path_buf(),
        })?;
        Ok(Self { repo })
    }

    /// The repository's git directory.
    pub fn git_dir(&self) -> &Path {
        self.repo.path()
    }

    fn to_git2_oid(oid: &Oid) -> Result<git2::Oid, GitError> {
        git2::Oid::from_str(oid.as_str()).map_err(|_| GitError::ObjectNotFound {
            oid: oid.to_string(),
        })
    }

    fn from_git2_oid(oid: git2::Oid) -> Oid {
        Oid::new(oid.to_string()).expect("git2 oids are valid hex")
    }

    /// Resolve a ref to the commit it points at.
    ///
    /// # Errors
    ///
    /// Returns `GitError::RefNotFound` if the ref does not exist.
    pub fn resolve_ref(&self, refname: &str) -> Result<Oid, GitError> {
        let reference = self
            .repo
            .find_reference(refname)
            .map_err(|e| GitError::from_git2(e, refname))?;
        let resolved = reference
            .resolve()
            .map_err(|e| GitError::from_git2(e, refname))?;
        resolved
            .target()
            .map(Self::from_git2_oid)
            .ok_or_else(|| GitError::RefNotFound {
                refname: refname.to_string(),
            })
    }

    /// Resolve a ref, returning `None` if it does not exist.
    pub fn try_resolve_ref(&self, refname: &str) -> Result<Option<Oid>, GitError> {
        match self.resolve_ref(refname) {
            Ok(oid) => Ok(Some(oid)),
            Err(GitError::RefNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List all refs under a prefix, sorted by name.
    pub fn list_refs_by_prefix(&self, prefix: &str) -> Result<Vec<RefTarget>, GitError> {
        let mut entries = Vec::new();
        let glob = format!("{}*", prefix);
        let refs = self
            .repo
            .references_glob(&glob)
            .map_err(|e| GitError::from_git2(e, prefix))?;
        for reference in refs {
            let reference = reference.map_err(|e| GitError::from_git2(e, prefix))?;
            let name = match reference.name() {
                Some(n) => n.to_string(),
                None => continue,
            };
            let oid = match reference.resolve().ok().and_then(|r| r.target()) {
                Some(t) => Self::from_git2_oid(t),
                None => continue,
            };
            entries.push(RefTarget { name, oid });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Update a ref with compare-and-swap semantics.
    ///
    /// The update succeeds only if the ref's current value equals
    /// `expected_old` (`None` or the zero id mean the ref must not
    /// exist). The precondition is checked by the ref store under the
    /// ref's own lock, not by a read in this process, so two racing
    /// writers cannot both succeed. The update itself is forced:
    /// ancestry between old and new values is policy, enforced upstream
    /// by the validator, not here - rewritten patchset history
    /// legitimately moves refs non-fast-forward.
    ///
    /// # Errors
    ///
    /// Returns `GitError::CasFailed` when the precondition fails and
    /// `GitError::LockFailure` when the ref lock cannot be taken.
    pub fn update_ref_cas(
        &self,
        refname: &str,
        expected_old: Option<&Oid>,
        new: &Oid,
        log_message: &str,
    ) -> Result<(), GitError> {
        let new_oid = Self::to_git2_oid(new)?;
        let result = match expected_old {
            Some(expected) if !expected.is_zero() => self
                .repo
                .reference_matching(
                    refname,
                    new_oid,
                    true,
                    Self::to_git2_oid(expected)?,
                    log_message,
                )
                .map(|_| ()),
            // creation: an unforced write fails if the ref already exists
            _ => self
                .repo
                .reference(refname, new_oid, false, log_message)
                .map(|_| ()),
        };
        result.map_err(|e| self.cas_error(e, refname, expected_old))
    }

    /// Delete a ref with compare-and-swap semantics.
    ///
    /// The ref store re-checks the value observed here under the ref
    /// lock before removing it, so a concurrent update loses nothing: it
    /// is the delete that fails.
    pub fn delete_ref_cas(&self, refname: &str, expected_old: &Oid) -> Result<(), GitError> {
        let mut reference = self
            .repo
            .find_reference(refname)
            .map_err(|e| GitError::from_git2(e, refname))?;
        let actual = reference
            .resolve()
            .map_err(|e| GitError::from_git2(e, refname))?
            .target()
            .map(Self::from_git2_oid)
            .ok_or_else(|| GitError::RefNotFound {
                refname: refname.to_string(),
            })?;
        if &actual != expected_old {
            return Err(GitError::CasFailed {
                refname: refname.to_string(),
                expected: expected_old.to_string(),
                actual: actual.to_string(),
            });
        }
        reference
            .delete()
            .map_err(|e| self.cas_error(e, refname, Some(expected_old)))
    }

    /// Map a failed conditional ref write to the CAS error taxonomy,
    /// re-reading the ref for the loser's error message.
    fn cas_error(&self, err: git2::Error, refname: &str, expected_old: Option<&Oid>) -> GitError {
        match err.code() {
            git2::ErrorCode::Modified | git2::ErrorCode::Exists => {
                let actual = self
                    .try_resolve_ref(refname)
                    .ok()
                    .flatten()
                    .unwrap_or_else(Oid::zero);
                GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected_old
                        .map(|o| o.to_string())
                        .unwrap_or_else(|| Oid::zero().to_string()),
                    actual: actual.to_string(),
                }
            }
            _ => GitError::from_git2(err, refname),
        }
    }

    /// The merge base of two commits, or `None` when the histories are
    /// unrelated.
    pub fn merge_base(&self, a: &Oid, b: &Oid) -> Result<Option<Oid>, GitError> {
        let a = Self::to_git2_oid(a)?;
        let b = Self::to_git2_oid(b)?;
        match self.repo.merge_base(a, b) {
            Ok(base) => Ok(Some(Self::from_git2_oid(base))),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, "merge-base")),
        }
    }

    /// Parse commit metadata.
    pub fn commit_info(&self, oid: &Oid) -> Result<CommitInfo, GitError> {
        let commit = self
            .repo
            .find_commit(Self::to_git2_oid(oid)?)
            .map_err(|e| GitError::from_git2(e, oid.as_str()))?;
        Ok(Self::commit_info_from(&commit))
    }

    fn commit_info_from(commit: &git2::Commit<'_>) -> CommitInfo {
        let message = commit.message().unwrap_or("").to_string();
        let title = message.lines().next().unwrap_or("").trim().to_string();
        let identity = |sig: git2::Signature<'_>| Identity {
            name: sig.name().unwrap_or("").to_string(),
            email: sig.email().unwrap_or("").to_string(),
        };
        CommitInfo {
            oid: Self::from_git2_oid(commit.id()),
            author: identity(commit.author()),
            committer: identity(commit.committer()),
            title,
            message,
            parents: commit.parent_ids().map(Self::from_git2_oid).collect(),
        }
    }

    /// List the commits newly reachable from `new` but not from `old`,
    /// newest first. A zero `old` lists everything reachable from `new`.
    pub fn rev_list(&self, old: &Oid, new: &Oid) -> Result<Vec<CommitInfo>, GitError> {
        self.rev_list_excluding(new, std::slice::from_ref(old))
    }

    /// List the commits reachable from `tip` but from none of `hide`,
    /// newest first. Zero entries in `hide` are skipped. Used to find
    /// the commits orphaned by a branch delete, hiding every surviving
    /// branch tip.
    pub fn rev_list_excluding(
        &self,
        tip: &Oid,
        hide: &[Oid],
    ) -> Result<Vec<CommitInfo>, GitError> {
        let mut walk = self
            .repo
            .revwalk()
            .map_err(|e| GitError::from_git2(e, "revwalk"))?;
        walk.push(Self::to_git2_oid(tip)?)
            .map_err(|e| GitError::from_git2(e, tip.as_str()))?;
        for old in hide {
            if old.is_zero() {
                continue;
            }
            walk.hide(Self::to_git2_oid(old)?)
                .map_err(|e| GitError::from_git2(e, old.as_str()))?;
        }
        let mut commits = Vec::new();
        for oid in walk {
            let oid = oid.map_err(|e| GitError::from_git2(e, "revwalk"))?;
            let commit = self
                .repo
                .find_commit(oid)
                .map_err(|e| GitError::from_git2(e, "revwalk"))?;
            commits.push(Self::commit_info_from(&commit));
        }
        Ok(commits)
    }

    /// Walk the first-parent chain from `new` down to (excluding) `old`,
    /// newest first. Right-hand parents introduced by merges are never
    /// visited, so a `--no-ff` merge contributes only the merge commit
    /// itself. The walk stops once it reaches history already contained
    /// in `old`, even when `old` itself sits off the first-parent chain,
    /// so only commits in `old..new` are returned.
    pub fn first_parent_chain(
        &self,
        old: &Oid,
        new: &Oid,
    ) -> Result<Vec<CommitInfo>, GitError> {
        let mut chain = Vec::new();
        let mut cursor = new.clone();
        while !cursor.is_zero() && &cursor != old {
            if !old.is_zero() && self.is_ancestor(&cursor, old)? {
                break;
            }
            let info = self.commit_info(&cursor)?;
            let next = info.first_parent().cloned();
            chain.push(info);
            match next {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        Ok(chain)
    }

    /// Whether the merge of `theirs` into `ours` has no conflicts.
    /// Performed entirely in memory; the repository is not touched.
    pub fn can_merge_clean(&self, ours: &Oid, theirs: &Oid) -> Result<bool, GitError> {
        let ours = self
            .repo
            .find_commit(Self::to_git2_oid(ours)?)
            .map_err(|e| GitError::from_git2(e, "merge"))?;
        let theirs = self
            .repo
            .find_commit(Self::to_git2_oid(theirs)?)
            .map_err(|e| GitError::from_git2(e, "merge"))?;
        let index = self
            .repo
            .merge_commits(&ours, &theirs, None)
            .map_err(|e| GitError::from_git2(e, "merge"))?;
        Ok(!index.has_conflicts())
    }

    /// Create a merge commit of `theirs` into `ours` without touching
    /// any ref. Returns the new commit id; the caller moves the branch
    /// ref under CAS.
    ///
    /// # Errors
    ///
    /// Returns `GitError::Internal` with a conflict message when the
    /// merge does not apply cleanly.
    pub fn create_merge_commit(
        &self,
        ours: &Oid,
        theirs: &Oid,
        committer_name: &str,
        committer_email: &str,
        message: &str,
    ) -> Result<Oid, GitError> {
        let ours_commit = self
            .repo
            .find_commit(Self::to_git2_oid(ours)?)
            .map_err(|e| GitError::from_git2(e, "merge"))?;
        let theirs_commit = self
            .repo
            .find_commit(Self::to_git2_oid(theirs)?)
            .map_err(|e| GitError::from_git2(e, "merge"))?;

        let mut index = self
            .repo
            .merge_commits(&ours_commit, &theirs_commit, None)
            .map_err(|e| GitError::from_git2(e, "merge"))?;
        if index.has_conflicts() {
            return Err(GitError::Internal {
                message: format!("merge of {} into {} has conflicts", theirs, ours),
            });
        }
        let tree_oid = index
            .write_tree_to(&self.repo)
            .map_err(|e| GitError::from_git2(e, "merge"))?;
        let tree = self
            .repo
            .find_tree(tree_oid)
            .map_err(|e| GitError::from_git2(e, "merge"))?;
        let signature = git2::Signature::now(committer_name, committer_email)
            .map_err(|e| GitError::from_git2(e, "signature"))?;
        let merge_oid = self
            .repo
            .commit(
                None,
                &signature,
                &signature,
                message,
                &tree,
                &[&ours_commit, &theirs_commit],
            )
            .map_err(|e| GitError::from_git2(e, "merge"))?;
        Ok(Self::from_git2_oid(merge_oid))
    }
}

impl CommitGraph for Git {
    fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError> {
        if ancestor == descendant {
            return Ok(true);
        }
        let ancestor = Self::to_git2_oid(ancestor)?;
        let descendant = Self::to_git2_oid(descendant)?;
        self.repo
            .graph_descendant_of(descendant, ancestor)
            .map_err(|e| GitError::from_git2(e, "ancestry"))
    }

    fn commit_count(&self, base: &Oid, tip: &Oid) -> Result<usize, GitError> {
        let mut walk = self
            .repo
            .revwalk()
            .map_err(|e| GitError::from_git2(e, "revwalk"))?;
        walk.push(Self::to_git2_oid(tip)?)
            .map_err(|e| GitError::from_git2(e, tip.as_str()))?;
        if !base.is_zero() {
            walk.hide(Self::to_git2_oid(base)?)
                .map_err(|e| GitError::from_git2(e, base.as_str()))?;
        }
        let mut count = 0;
        for oid in walk {
            oid.map_err(|e| GitError::from_git2(e, "revwalk"))?;
            count += 1;
        }
        Ok(count)
    }

    fn diff_stat(&self, base: &Oid, tip: &Oid) -> Result<DiffStat, GitError> {
        let tip_tree = self
            .repo
            .find_commit(Self::to_git2_oid(tip)?)
            .and_then(|c| c.tree())
            .map_err(|e| GitError::from_git2(e, tip.as_str()))?;
        let base_tree = if base.is_zero() {
            None
        } else {
            Some(
                self.repo
                    .find_commit(Self::to_git2_oid(base)?)
                    .and_then(|c| c.tree())
                    .map_err(|e| GitError::from_git2(e, base.as_str()))?,
            )
        };
        let diff = self
            .repo
            .diff_tree_to_tree(base_tree.as_ref(), Some(&tip_tree), None)
            .map_err(|e| GitError::from_git2(e, "diff"))?;
        let stats = diff
            .stats()
            .map_err(|e| GitError::from_git2(e, "diff"))?;
        Ok(DiffStat {
            insertions: stats.insertions(),
            deletions: stats.deletions(),
        })
    }
}
