//! Property tests for the patchset classifier.
//!
//! The classifier is a pure function of its inputs and the commit
//! graph; these tests drive it through a scripted graph and check the
//! numbering invariants hold for arbitrary ticket states.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use cairn::core::ticket::{Patchset, PatchsetType};
use cairn::core::types::Oid;
use cairn::git::{CommitGraph, DiffStat, GitError};
use cairn::receive::Classifier;

/// A commit graph scripted from test inputs.
#[derive(Default)]
struct ScriptedGraph {
    ancestors: HashSet<(Oid, Oid)>,
    counts: HashMap<(Oid, Oid), usize>,
}

impl CommitGraph for ScriptedGraph {
    fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError> {
        Ok(ancestor == descendant
            || self
                .ancestors
                .contains(&(ancestor.clone(), descendant.clone())))
    }

    fn commit_count(&self, base: &Oid, tip: &Oid) -> Result<usize, GitError> {
        Ok(*self.counts.get(&(base.clone(), tip.clone())).unwrap_or(&0))
    }

    fn diff_stat(&self, _base: &Oid, _tip: &Oid) -> Result<DiffStat, GitError> {
        Ok(DiffStat {
            insertions: 1,
            deletions: 1,
        })
    }
}

fn oid(n: u64) -> Oid {
    Oid::new(format!("{:040x}", n)).unwrap()
}

/// The distinct commits involved in one classification.
const OLD_BASE: u64 = 1;
const NEW_BASE: u64 = 2;
const CURRENT_TIP: u64 = 3;
const NEW_TIP: u64 = 4;
const INTEGRATION: u64 = 5;

#[derive(Debug, Clone)]
struct Scenario {
    number: u32,
    rev: u32,
    current_commits: usize,
    total_commits: usize,
    fast_forward: bool,
    merged: bool,
    base_moved: bool,
}

fn scenarios() -> impl Strategy<Value = Scenario> {
    (
        1u32..50,
        1u32..10,
        1usize..20,
        1usize..20,
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(number, rev, current_commits, total_commits, fast_forward, merged, base_moved)| {
                Scenario {
                    number,
                    rev,
                    current_commits,
                    total_commits,
                    fast_forward,
                    merged,
                    base_moved,
                }
            },
        )
}

fn build(scenario: &Scenario) -> (ScriptedGraph, Patchset, Oid, Oid, Oid) {
    let merge_base = if scenario.base_moved {
        oid(NEW_BASE)
    } else {
        oid(OLD_BASE)
    };
    let tip = oid(NEW_TIP);
    let integration = oid(INTEGRATION);

    let mut graph = ScriptedGraph::default();
    graph
        .counts
        .insert((merge_base.clone(), tip.clone()), scenario.total_commits);
    if scenario.fast_forward {
        graph.ancestors.insert((oid(CURRENT_TIP), tip.clone()));
    }
    if scenario.merged {
        graph
            .ancestors
            .insert((oid(CURRENT_TIP), integration.clone()));
    }

    let current = Patchset {
        number: scenario.number,
        rev: scenario.rev,
        kind: PatchsetType::Proposal,
        tip: oid(CURRENT_TIP),
        base: oid(OLD_BASE),
        parent: None,
        commits: scenario.current_commits,
        added: None,
        insertions: 0,
        deletions: 0,
    };
    (graph, current, merge_base, tip, integration)
}

proptest! {
    #[test]
    fn classification_is_deterministic(scenario in scenarios()) {
        let (graph, current, merge_base, tip, integration) = build(&scenario);
        let classifier = Classifier::new(&graph);
        let first = classifier
            .classify(Some(&current), &merge_base, &tip, &integration)
            .unwrap();
        let second = classifier
            .classify(Some(&current), &merge_base, &tip, &integration)
            .unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn number_never_decreases_and_rev_resets_on_renumber(scenario in scenarios()) {
        let (graph, current, merge_base, tip, integration) = build(&scenario);
        let ps = Classifier::new(&graph)
            .classify(Some(&current), &merge_base, &tip, &integration)
            .unwrap();

        prop_assert!(ps.number >= current.number);
        if ps.number == current.number {
            // only a plain fast-forward keeps the number
            prop_assert_eq!(ps.kind, PatchsetType::FastForward);
            prop_assert_eq!(ps.rev, current.rev + 1);
            prop_assert_eq!(ps.parent.as_ref(), Some(&current.tip));
        } else {
            prop_assert_eq!(ps.number, current.number + 1);
            prop_assert_eq!(ps.rev, 1);
            prop_assert!(ps.parent.is_none());
        }
    }

    #[test]
    fn fast_forward_of_unmerged_tip_keeps_the_number(scenario in scenarios()) {
        let scenario = Scenario { fast_forward: true, merged: false, ..scenario };
        let (graph, current, merge_base, tip, integration) = build(&scenario);
        let ps = Classifier::new(&graph)
            .classify(Some(&current), &merge_base, &tip, &integration)
            .unwrap();
        prop_assert_eq!(ps.kind, PatchsetType::FastForward);
        prop_assert_eq!((ps.number, ps.rev), (current.number, current.rev + 1));
    }

    #[test]
    fn added_is_recorded_only_when_positive(scenario in scenarios()) {
        let (graph, current, merge_base, tip, integration) = build(&scenario);
        let ps = Classifier::new(&graph)
            .classify(Some(&current), &merge_base, &tip, &integration)
            .unwrap();
        match ps.added {
            Some(added) => {
                prop_assert!(added > 0);
                prop_assert_eq!(added, scenario.total_commits - scenario.current_commits);
            }
            None => prop_assert!(scenario.total_commits <= scenario.current_commits),
        }
    }

    #[test]
    fn first_patchset_is_always_a_proposal(total in 1usize..20) {
        let merge_base = oid(OLD_BASE);
        let tip = oid(NEW_TIP);
        let mut graph = ScriptedGraph::default();
        graph.counts.insert((merge_base.clone(), tip.clone()), total);

        let ps = Classifier::new(&graph)
            .classify(None, &merge_base, &tip, &oid(INTEGRATION))
            .unwrap();
        prop_assert_eq!(ps.kind, PatchsetType::Proposal);
        prop_assert_eq!((ps.number, ps.rev), (1, 1));
        prop_assert_eq!(ps.commits, total);
        prop_assert!(ps.added.is_none());
    }
}
