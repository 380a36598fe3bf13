//! receive::classify
//!
//! The patchset classifier.
//!
//! Given a ticket's current patchset (if any) and the newly pushed tip,
//! compute the new patchset's type, number, revision, and diff
//! statistics. The classifier is a pure function of its inputs and the
//! immutable commit graph: calling it twice with identical inputs
//! yields identical output.
//!
//! # Numbering
//!
//! - `number` increments on rewrite (rebase/squash/amend) and when a
//!   fast-forward lands on an already-merged tip; it is stable across
//!   plain fast-forwards
//! - `rev` increments on fast-forward and resets to 1 otherwise
//!
//! # Decision table (existing ticket)
//!
//! | ancestor(current.tip, tip) | base moved | commits shrank | type         |
//! |---------------------------|------------|----------------|--------------|
//! | yes, tip already merged   | -          | -              | Rebase       |
//! | yes                       | -          | -              | FastForward  |
//! | no                        | yes        | yes            | RebaseSquash |
//! | no                        | no         | yes            | Squash       |
//! | no                        | yes        | no             | Rebase       |
//! | no                        | no         | no             | Amend        |

use crate::core::ticket::{Patchset, PatchsetType};
use crate::core::types::Oid;
use crate::git::{CommitGraph, GitError};

/// Classifies pushed tips into patchsets against a commit graph.
pub struct Classifier<'a> {
    graph: &'a dyn CommitGraph,
}

impl<'a> Classifier<'a> {
    pub fn new(graph: &'a dyn CommitGraph) -> Self {
        Self { graph }
    }

    /// Compute the patchset for a newly pushed `tip`.
    ///
    /// * `current` - the ticket's latest patchset, if the ticket has one
    /// * `merge_base` - merge base of `tip` and the integration branch
    /// * `tip` - the pushed commit
    /// * `integration_tip` - current tip of the integration branch, used
    ///   to detect a fast-forward landing on an already-merged patchset
    pub fn classify(
        &self,
        current: Option<&Patchset>,
        merge_base: &Oid,
        tip: &Oid,
        integration_tip: &Oid,
    ) -> Result<Patchset, GitError> {
        let total_commits = self.graph.commit_count(merge_base, tip)?;

        let current = match current {
            None => {
                // first patchset of a new ticket
                let stat = self.graph.diff_stat(merge_base, tip)?;
                return Ok(Patchset {
                    number: 1,
                    rev: 1,
                    kind: PatchsetType::Proposal,
                    tip: tip.clone(),
                    base: merge_base.clone(),
                    parent: None,
                    commits: total_commits,
                    added: None,
                    insertions: stat.insertions,
                    deletions: stat.deletions,
                });
            }
            Some(current) => current,
        };

        let added = total_commits as i64 - current.commits as i64;
        let fast_forward = self.graph.is_ancestor(&current.tip, tip)?;
        let squash = added < 0;
        let rebase = current.base != *merge_base;

        if fast_forward {
            let already_merged = self.graph.is_ancestor(&current.tip, integration_tip)?;
            if already_merged {
                // the prior patchset has landed; this is logically a new
                // patchset continuing the ticket
                let stat = self.graph.diff_stat(merge_base, tip)?;
                return Ok(Patchset {
                    number: current.number + 1,
                    rev: 1,
                    kind: PatchsetType::Rebase,
                    tip: tip.clone(),
                    base: merge_base.clone(),
                    parent: None,
                    commits: total_commits,
                    added: positive(added),
                    insertions: stat.insertions,
                    deletions: stat.deletions,
                });
            }

            let stat = self.graph.diff_stat(&current.tip, tip)?;
            return Ok(Patchset {
                number: current.number,
                rev: current.rev + 1,
                kind: PatchsetType::FastForward,
                tip: tip.clone(),
                base: merge_base.clone(),
                parent: Some(current.tip.clone()),
                commits: total_commits,
                added: positive(added),
                insertions: stat.insertions,
                deletions: stat.deletions,
            });
        }

        let kind = match (rebase, squash) {
            (true, true) => PatchsetType::RebaseSquash,
            (false, true) => PatchsetType::Squash,
            (true, false) => PatchsetType::Rebase,
            (false, false) => PatchsetType::Amend,
        };
        let stat = self.graph.diff_stat(merge_base, tip)?;
        Ok(Patchset {
            number: current.number + 1,
            rev: 1,
            kind,
            tip: tip.clone(),
            base: merge_base.clone(),
            parent: None,
            commits: total_commits,
            added: positive(added),
            insertions: stat.insertions,
            deletions: stat.deletions,
        })
    }
}

/// Squashes do not report a negative added count.
fn positive(added: i64) -> Option<usize> {
    (added > 0).then_some(added as usize)
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scriptable in-memory commit graph for classifier tests.

    use std::collections::{HashMap, HashSet};

    use crate::git::DiffStat;

    use super::*;

    #[derive(Default)]
    pub struct MockGraph {
        ancestors: HashSet<(Oid, Oid)>,
        counts: HashMap<(Oid, Oid), usize>,
    }

    impl MockGraph {
        pub fn ancestor(mut self, ancestor: &Oid, descendant: &Oid) -> Self {
            self.ancestors
                .insert((ancestor.clone(), descendant.clone()));
            self
        }

        pub fn count(mut self, base: &Oid, tip: &Oid, n: usize) -> Self {
            self.counts.insert((base.clone(), tip.clone()), n);
            self
        }
    }

    impl CommitGraph for MockGraph {
        fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError> {
            Ok(ancestor == descendant
                || self
                    .ancestors
                    .contains(&(ancestor.clone(), descendant.clone())))
        }

        fn commit_count(&self, base: &Oid, tip: &Oid) -> Result<usize, GitError> {
            Ok(*self
                .counts
                .get(&(base.clone(), tip.clone()))
                .unwrap_or(&0))
        }

        fn diff_stat(&self, _base: &Oid, _tip: &Oid) -> Result<DiffStat, GitError> {
            Ok(DiffStat {
                insertions: 4,
                deletions: 2,
            })
        }
    }

    pub fn oid(n: u8) -> Oid {
        Oid::new(format!("{:040x}", n)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{oid, MockGraph};
    use super::*;

    fn base() -> Oid {
        oid(1)
    }

    fn integration() -> Oid {
        oid(100)
    }

    fn current(number: u32, rev: u32, tip: Oid, commits: usize) -> Patchset {
        Patchset {
            number,
            rev,
            kind: PatchsetType::Proposal,
            tip,
            base: base(),
            parent: None,
            commits,
            added: None,
            insertions: 0,
            deletions: 0,
        }
    }

    #[test]
    fn first_push_is_a_proposal() {
        let graph = MockGraph::default().count(&base(), &oid(2), 1);
        let ps = Classifier::new(&graph)
            .classify(None, &base(), &oid(2), &integration())
            .unwrap();
        assert_eq!(ps.kind, PatchsetType::Proposal);
        assert_eq!((ps.number, ps.rev), (1, 1));
        assert_eq!(ps.commits, 1);
        assert_eq!(ps.parent, None);
        assert_eq!(ps.added, None);
    }

    #[test]
    fn fast_forward_keeps_number_and_bumps_rev() {
        // ticket #5: current {number:1, rev:1, tip:A}; push B, A ancestor of B
        let a = oid(2);
        let b = oid(3);
        let graph = MockGraph::default()
            .ancestor(&a, &b)
            .count(&base(), &b, 2);
        let cur = current(1, 1, a.clone(), 1);
        let ps = Classifier::new(&graph)
            .classify(Some(&cur), &base(), &b, &integration())
            .unwrap();
        assert_eq!(ps.kind, PatchsetType::FastForward);
        assert_eq!((ps.number, ps.rev), (1, 2));
        assert_eq!(ps.parent, Some(a));
        assert_eq!(ps.added, Some(1));
    }

    #[test]
    fn fast_forward_of_merged_tip_is_a_rebase() {
        let a = oid(2);
        let b = oid(3);
        let graph = MockGraph::default()
            .ancestor(&a, &b)
            .ancestor(&a, &integration())
            .count(&base(), &b, 2);
        let cur = current(1, 3, a, 1);
        let ps = Classifier::new(&graph)
            .classify(Some(&cur), &base(), &b, &integration())
            .unwrap();
        assert_eq!(ps.kind, PatchsetType::Rebase);
        assert_eq!((ps.number, ps.rev), (2, 1));
        assert_eq!(ps.parent, None);
    }

    #[test]
    fn squash_renumbers_and_resets_rev() {
        // ticket at {number:1, rev:2, tip:B, commits:3}; push C with 1 commit
        let b = oid(3);
        let c = oid(4);
        let graph = MockGraph::default().count(&base(), &c, 1);
        let cur = current(1, 2, b, 3);
        let ps = Classifier::new(&graph)
            .classify(Some(&cur), &base(), &c, &integration())
            .unwrap();
        assert_eq!(ps.kind, PatchsetType::Squash);
        assert_eq!((ps.number, ps.rev), (2, 1));
        assert_eq!(ps.added, None, "negative added counts are not recorded");
    }

    #[test]
    fn moved_base_is_a_rebase() {
        let b = oid(3);
        let c = oid(4);
        let new_base = oid(5);
        let graph = MockGraph::default().count(&new_base, &c, 3);
        let cur = current(2, 1, b, 3);
        let ps = Classifier::new(&graph)
            .classify(Some(&cur), &new_base, &c, &integration())
            .unwrap();
        assert_eq!(ps.kind, PatchsetType::Rebase);
        assert_eq!((ps.number, ps.rev), (3, 1));
    }

    #[test]
    fn moved_base_with_fewer_commits_is_rebase_squash() {
        let b = oid(3);
        let c = oid(4);
        let new_base = oid(5);
        let graph = MockGraph::default().count(&new_base, &c, 1);
        let cur = current(1, 1, b, 3);
        let ps = Classifier::new(&graph)
            .classify(Some(&cur), &new_base, &c, &integration())
            .unwrap();
        assert_eq!(ps.kind, PatchsetType::RebaseSquash);
    }

    #[test]
    fn same_base_same_count_is_amend() {
        let b = oid(3);
        let c = oid(4);
        let graph = MockGraph::default().count(&base(), &c, 3);
        let cur = current(1, 1, b, 3);
        let ps = Classifier::new(&graph)
            .classify(Some(&cur), &base(), &c, &integration())
            .unwrap();
        assert_eq!(ps.kind, PatchsetType::Amend);
        assert_eq!((ps.number, ps.rev), (2, 1));
    }

    #[test]
    fn classification_is_deterministic() {
        let a = oid(2);
        let b = oid(3);
        let graph = MockGraph::default()
            .ancestor(&a, &b)
            .count(&base(), &b, 2);
        let cur = current(1, 1, a, 1);
        let classifier = Classifier::new(&graph);
        let first = classifier
            .classify(Some(&cur), &base(), &b, &integration())
            .unwrap();
        let second = classifier
            .classify(Some(&cur), &base(), &b, &integration())
            .unwrap();
        assert_eq!(first, second);
    }
}
