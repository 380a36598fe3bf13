//! core::ticket
//!
//! The ticket aggregate and its append-only change history.
//!
//! # Model
//!
//! - [`Patchset`] - one revision of a proposed change, immutable once pushed
//! - [`Change`] - an atomic mutation record appended to a ticket
//! - [`TicketLink`] - a commit-message reference or closure of a ticket
//! - [`Ticket`] - the aggregate; its current state is the left-fold of
//!   all of its changes via [`Ticket::apply_change`]
//!
//! The receive pipeline only ever *produces* changes; the ticket store
//! owns persistence and replays the same fold. Keeping the reducer here
//! guarantees the store and the pipeline agree on ticket state.
//!
//! # Invariants
//!
//! - `Patchset.number` is monotonic per ticket
//! - `(number, rev)` pairs are unique and ordered by push time
//! - Changes are append-only; folding is deterministic

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::{BranchName, Oid, TicketId};

/// Classification of a pushed patchset relative to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchsetType {
    /// The first patchset of a new ticket.
    Proposal,
    /// New history is a strict superset of the previous patchset.
    FastForward,
    /// The merge base moved: the target branch advanced or history was
    /// replayed onto a new base.
    Rebase,
    /// History was collapsed into fewer commits.
    Squash,
    /// Rebase and squash at once.
    RebaseSquash,
    /// Same base, same count, different history.
    Amend,
}

impl PatchsetType {
    /// True for the types that preserve the previous patchset tip as an
    /// ancestor.
    pub fn is_fast_forward(&self) -> bool {
        matches!(self, PatchsetType::Proposal | PatchsetType::FastForward)
    }

    /// True for the types that rewrite history underneath a preserved
    /// ticket number, which forces the underlying ref update.
    pub fn is_rewrite(&self) -> bool {
        !self.is_fast_forward()
    }
}

impl std::fmt::Display for PatchsetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PatchsetType::Proposal => "proposal",
            PatchsetType::FastForward => "fast-forward",
            PatchsetType::Rebase => "rebase",
            PatchsetType::Squash => "squash",
            PatchsetType::RebaseSquash => "rebase+squash",
            PatchsetType::Amend => "amend",
        };
        write!(f, "{s}")
    }
}

/// One revision of a proposed change attached to a ticket.
///
/// `number` increments on rewrite (rebase/squash/amend) and is stable
/// across fast-forwards; `rev` increments on fast-forward and resets to
/// 1 otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patchset {
    pub number: u32,
    pub rev: u32,
    pub kind: PatchsetType,
    /// Tip commit of this patchset.
    pub tip: Oid,
    /// Merge base with the integration branch.
    pub base: Oid,
    /// Previous tip, recorded only for fast-forwards.
    pub parent: Option<Oid>,
    /// Commits reachable from `tip` but not from `base`.
    pub commits: usize,
    /// Commits added since the previous patchset, recorded only when
    /// positive (a squash does not report a negative count).
    pub added: Option<usize>,
    pub insertions: usize,
    pub deletions: usize,
}

impl std::fmt::Display for Patchset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ps{}r{}", self.number, self.rev)
    }
}

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    New,
    Open,
    Merged,
    Resolved,
    Fixed,
    Wontfix,
    Declined,
    OnHold,
}

impl Status {
    /// Everything past `Open` is closed.
    pub fn is_closed(&self) -> bool {
        !matches!(self, Status::New | Status::Open)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::New => "new",
            Status::Open => "open",
            Status::Merged => "merged",
            Status::Resolved => "resolved",
            Status::Fixed => "fixed",
            Status::Wontfix => "wontfix",
            Status::Declined => "declined",
            Status::OnHold => "on hold",
        };
        write!(f, "{s}")
    }
}

/// The action a commit-message reference takes on a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkAction {
    /// Informational reference; valid on any branch, open or closed.
    Commit,
    /// Close the ticket; valid only for open tickets on the ticket's
    /// integration branch.
    Close,
}

/// A derived reference from a commit message to a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketLink {
    /// The referenced ticket.
    pub ticket: TicketId,
    pub action: LinkAction,
    /// The referencing commit.
    pub hash: Oid,
    /// True when a branch rewind retroactively invalidated a previously
    /// recorded link.
    pub is_delete: bool,
}

impl TicketLink {
    pub fn new(ticket: TicketId, action: LinkAction, hash: Oid) -> Self {
        Self {
            ticket,
            action,
            hash,
            is_delete: false,
        }
    }

    /// Mark this link as retroactively invalidated.
    pub fn deleted(mut self) -> Self {
        self.is_delete = true;
        self
    }
}

/// Field mutations carried by a change. Absent fields are untouched by
/// the fold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub status: Option<Status>,
    pub merge_to: Option<BranchName>,
    pub merge_sha: Option<Oid>,
    pub responsible: Option<String>,
    pub milestone: Option<String>,
    pub topic: Option<String>,
}

/// An atomic mutation record applied to a ticket.
///
/// Changes are append-only; a ticket's current state is the left-fold
/// of all its changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Content-derived change id.
    pub id: String,
    /// Username of the identity that caused the change.
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub fields: FieldChanges,
    pub patchset: Option<Patchset>,
    /// Usernames added to the watcher set.
    pub watch: BTreeSet<String>,
    /// Usernames removed from the watcher set.
    pub unwatch: BTreeSet<String>,
    /// Links extracted from commit messages, pending store processing.
    pub pending_links: Vec<TicketLink>,
    pub comment: Option<String>,
}

impl Change {
    /// Create an empty change authored now.
    pub fn new(author: impl Into<String>) -> Self {
        let author = author.into();
        let created_at = Utc::now();
        let id = change_id(&author, &created_at);
        Self {
            id,
            author,
            created_at,
            fields: FieldChanges::default(),
            patchset: None,
            watch: BTreeSet::new(),
            unwatch: BTreeSet::new(),
            pending_links: Vec::new(),
            comment: None,
        }
    }

    pub fn has_patchset(&self) -> bool {
        self.patchset.is_some()
    }

    /// A merge change records both a status and the merge SHA.
    pub fn is_merge(&self) -> bool {
        self.fields.status.is_some() && self.fields.merge_sha.is_some()
    }

    /// Add usernames to the watcher set carried by this change.
    pub fn watch<I, S>(&mut self, usernames: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for u in usernames {
            self.watch.insert(u.into().to_lowercase());
        }
    }
}

/// Derive a change id from its author and creation instant.
fn change_id(author: &str, created_at: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(created_at.to_rfc3339().as_bytes());
    hasher.update(author.as_bytes());
    hex::encode(hasher.finalize())
}

/// The ticket aggregate.
///
/// Owned by the ticket store; the receive pipeline reads it and produces
/// changes to append. [`Ticket::from_changes`] reconstructs state by
/// folding, so a store that journals changes needs no other reducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Name of the owning repository.
    pub repository: String,
    pub number: TicketId,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub status: Status,
    /// Target integration branch, when assigned.
    pub merge_to: Option<BranchName>,
    pub merge_sha: Option<Oid>,
    pub responsible: Option<String>,
    pub milestone: Option<String>,
    pub topic: Option<String>,
    /// Ordered by push time; invariants on `(number, rev)` hold here.
    pub patchsets: Vec<Patchset>,
    pub changes: Vec<Change>,
    pub watchers: BTreeSet<String>,
    /// Commit-message links recorded against this ticket.
    pub links: Vec<TicketLink>,
}

impl Ticket {
    /// Reconstruct a ticket by folding its change history.
    ///
    /// The first change establishes authorship and creation time.
    pub fn from_changes(
        repository: impl Into<String>,
        number: TicketId,
        changes: impl IntoIterator<Item = Change>,
    ) -> Option<Self> {
        let mut iter = changes.into_iter();
        let first = iter.next()?;
        let mut ticket = Self {
            repository: repository.into(),
            number,
            created_by: first.author.clone(),
            created_at: first.created_at,
            title: String::new(),
            body: String::new(),
            status: Status::New,
            merge_to: None,
            merge_sha: None,
            responsible: None,
            milestone: None,
            topic: None,
            patchsets: Vec::new(),
            changes: Vec::new(),
            watchers: BTreeSet::new(),
            links: Vec::new(),
        };
        ticket.apply_change(first);
        for change in iter {
            ticket.apply_change(change);
        }
        Some(ticket)
    }

    /// Fold one change into the aggregate and append it to history.
    pub fn apply_change(&mut self, change: Change) {
        let fields = &change.fields;
        if let Some(title) = &fields.title {
            self.title = title.clone();
        }
        if let Some(body) = &fields.body {
            self.body = body.clone();
        }
        if let Some(status) = fields.status {
            self.status = status;
        }
        if let Some(merge_to) = &fields.merge_to {
            self.merge_to = Some(merge_to.clone());
        }
        if let Some(merge_sha) = &fields.merge_sha {
            self.merge_sha = Some(merge_sha.clone());
        }
        if let Some(responsible) = &fields.responsible {
            self.responsible = Some(responsible.clone());
        }
        if let Some(milestone) = &fields.milestone {
            self.milestone = Some(milestone.clone());
        }
        if let Some(topic) = &fields.topic {
            self.topic = Some(topic.clone());
        }
        if let Some(patchset) = &change.patchset {
            self.patchsets.push(patchset.clone());
        }
        self.watchers.extend(change.watch.iter().cloned());
        for u in &change.unwatch {
            self.watchers.remove(u);
        }
        for link in &change.pending_links {
            if link.is_delete {
                self.links
                    .retain(|l| !(l.hash == link.hash && l.action == link.action));
            } else {
                self.links.push(link.clone());
            }
        }
        self.changes.push(change);
    }

    /// The most recently pushed patchset.
    pub fn current_patchset(&self) -> Option<&Patchset> {
        self.patchsets.last()
    }

    pub fn is_merged(&self) -> bool {
        self.status == Status::Merged
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    pub fn is_author(&self, username: &str) -> bool {
        self.created_by.eq_ignore_ascii_case(username)
    }

    pub fn is_responsible(&self, username: &str) -> bool {
        self.responsible
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(username))
    }

    /// True if `username` authored any change carrying a patchset.
    pub fn is_patchset_author(&self, username: &str) -> bool {
        self.changes
            .iter()
            .any(|c| c.has_patchset() && c.author.eq_ignore_ascii_case(username))
    }

    /// Find the patchset whose tip is exactly `oid`.
    pub fn patchset_by_tip(&self, oid: &Oid) -> Option<&Patchset> {
        self.patchsets.iter().find(|ps| &ps.tip == oid)
    }

    /// True if `oid` is the tip of any recorded patchset.
    pub fn has_patchset_tip(&self, oid: &Oid) -> bool {
        self.patchset_by_tip(oid).is_some()
    }
}
