//! Cairn - the push-reception core of a Git hosting server
//!
//! Cairn implements the server side of `git push` for a hosting service
//! that layers a Gerrit-style code-review workflow on top of raw ref
//! updates. A single push can create a review ticket, append a new
//! revision to an existing one, fast-forward it, rewrite it, or resolve
//! other tickets referenced by commit messages - all while enforcing
//! permissions, committer-identity policy, and atomic ref update
//! semantics against a shared, file-system-backed repository.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`receive`] - The pipeline: validate → prepare → execute → post-process
//! - [`core`] - Domain types: tickets, patchsets, changes, ref conventions
//! - [`git`] - Single interface for all Git operations
//! - [`tickets`] - Ticket store and notification seams
//! - [`access`] - Repository descriptors and pushing principals
//!
//! # Correctness Invariants
//!
//! Cairn maintains the following invariants:
//!
//! 1. Every ref mutation flows through the batch executor with
//!    compare-and-swap semantics; racing pushes lose with a lock
//!    failure, never a silent overwrite
//! 2. Patchset numbers are monotonic per ticket and `(number, rev)`
//!    pairs are strictly ordered by push time
//! 3. Rejection is data on the command, never an error path; every
//!    rejection carries a human-readable explanation for the client
//! 4. Ticket history is append-only; current state is the fold of its
//!    changes

pub mod access;
pub mod core;
pub mod git;
pub mod receive;
pub mod tickets;
