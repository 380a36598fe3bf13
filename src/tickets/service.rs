//! tickets::service
//!
//! The ticket store seam.
//!
//! [`TicketService`] is the pipeline's only view of ticket persistence.
//! Implementations journal changes and replay the fold in
//! [`crate::core::ticket::Ticket::from_changes`]; the pipeline never
//! mutates a ticket in place.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

use crate::core::ticket::{Change, Ticket};
use crate::core::types::TicketId;

/// Errors from the ticket store.
#[derive(Debug, Error)]
pub enum TicketStoreError {
    #[error("ticket {id} not found in {repository}")]
    NotFound { repository: String, id: TicketId },

    #[error("ticket {id} already exists in {repository}")]
    AlreadyExists { repository: String, id: TicketId },

    #[error("change journal is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("ticket store failure: {0}")]
    Internal(String),
}

/// Serialize a change journal as JSON lines, one change per line.
///
/// This is the interchange format between store backends: a ticket is
/// its journal, and any backend that can persist these lines can
/// rebuild the ticket with [`Ticket::from_changes`].
pub fn encode_journal(changes: &[Change]) -> Result<String, TicketStoreError> {
    let mut out = String::new();
    for change in changes {
        out.push_str(&serde_json::to_string(change)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a JSON-lines change journal. Blank lines are skipped.
pub fn decode_journal(text: &str) -> Result<Vec<Change>, TicketStoreError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(TicketStoreError::from))
        .collect()
}

/// The ticket store boundary.
///
/// Implementations are shared across concurrent pushes; methods take
/// `&self` and synchronize internally.
pub trait TicketService: Send + Sync {
    fn has_ticket(&self, repository: &str, id: TicketId) -> bool;

    fn get_ticket(&self, repository: &str, id: TicketId) -> Option<Ticket>;

    /// Reserve the next ticket number for a repository.
    fn assign_new_id(&self, repository: &str) -> Result<TicketId, TicketStoreError>;

    /// Create a ticket from its first change.
    fn create_ticket(
        &self,
        repository: &str,
        id: TicketId,
        change: Change,
    ) -> Result<Ticket, TicketStoreError>;

    /// Append a change to an existing ticket and return the new state.
    fn update_ticket(
        &self,
        repository: &str,
        id: TicketId,
        change: Change,
    ) -> Result<Ticket, TicketStoreError>;

    /// Drop any cached state for a repository.
    fn reset_caches(&self, repository: &str);
}

#[derive(Default)]
struct Shelf {
    next_id: u64,
    changes: HashMap<TicketId, Vec<Change>>,
}

/// An in-memory, journal-backed ticket store.
///
/// State is the change journal; every read replays the fold. Useful for
/// embedding and for pipeline tests.
#[derive(Default)]
pub struct MemoryTicketService {
    shelves: RwLock<HashMap<String, Shelf>>,
}

impl MemoryTicketService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketService for MemoryTicketService {
    fn has_ticket(&self, repository: &str, id: TicketId) -> bool {
        self.shelves
            .read()
            .expect("ticket store lock poisoned")
            .get(repository)
            .is_some_and(|shelf| shelf.changes.contains_key(&id))
    }

    fn get_ticket(&self, repository: &str, id: TicketId) -> Option<Ticket> {
        let shelves = self.shelves.read().expect("ticket store lock poisoned");
        let changes = shelves.get(repository)?.changes.get(&id)?;
        Ticket::from_changes(repository, id, changes.iter().cloned())
    }

    fn assign_new_id(&self, repository: &str) -> Result<TicketId, TicketStoreError> {
        let mut shelves = self.shelves.write().expect("ticket store lock poisoned");
        let shelf = shelves.entry(repository.to_string()).or_default();
        shelf.next_id += 1;
        TicketId::new(shelf.next_id).map_err(|e| TicketStoreError::Internal(e.to_string()))
    }

    fn create_ticket(
        &self,
        repository: &str,
        id: TicketId,
        change: Change,
    ) -> Result<Ticket, TicketStoreError> {
        let mut shelves = self.shelves.write().expect("ticket store lock poisoned");
        let shelf = shelves.entry(repository.to_string()).or_default();
        if shelf.changes.contains_key(&id) {
            return Err(TicketStoreError::AlreadyExists {
                repository: repository.to_string(),
                id,
            });
        }
        // ids handed out by assign_new_id stay ahead of direct creates
        shelf.next_id = shelf.next_id.max(id.get());
        shelf.changes.insert(id, vec![change.clone()]);
        debug!(repository, ticket = %id, "ticket created");
        Ticket::from_changes(repository, id, [change]).ok_or_else(|| {
            TicketStoreError::Internal("empty change journal after create".into())
        })
    }

    fn update_ticket(
        &self,
        repository: &str,
        id: TicketId,
        change: Change,
    ) -> Result<Ticket, TicketStoreError> {
        let mut shelves = self.shelves.write().expect("ticket store lock poisoned");
        let shelf = shelves
            .get_mut(repository)
            .ok_or_else(|| TicketStoreError::NotFound {
                repository: repository.to_string(),
                id,
            })?;
        let journal = shelf
            .changes
            .get_mut(&id)
            .ok_or_else(|| TicketStoreError::NotFound {
                repository: repository.to_string(),
                id,
            })?;
        journal.push(change);
        debug!(repository, ticket = %id, changes = journal.len(), "ticket updated");
        Ticket::from_changes(repository, id, journal.iter().cloned()).ok_or_else(|| {
            TicketStoreError::Internal("empty change journal after update".into())
        })
    }

    fn reset_caches(&self, _repository: &str) {
        // the journal is the only state; nothing cached to drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ticket::Status;

    #[test]
    fn assigns_monotonic_ids() {
        let store = MemoryTicketService::new();
        let a = store.assign_new_id("demo.git").unwrap();
        let b = store.assign_new_id("demo.git").unwrap();
        assert!(b.get() > a.get());
    }

    #[test]
    fn create_then_update_folds_changes() {
        let store = MemoryTicketService::new();
        let id = store.assign_new_id("demo.git").unwrap();

        let mut first = Change::new("alice");
        first.fields.title = Some("Fix parser state reset".into());
        first.fields.status = Some(Status::New);
        let ticket = store.create_ticket("demo.git", id, first).unwrap();
        assert_eq!(ticket.status, Status::New);

        let mut second = Change::new("bob");
        second.fields.status = Some(Status::Open);
        let ticket = store.update_ticket("demo.git", id, second).unwrap();
        assert_eq!(ticket.status, Status::Open);
        assert_eq!(ticket.changes.len(), 2);
        assert!(store.has_ticket("demo.git", id));
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let store = MemoryTicketService::new();
        let id = store.assign_new_id("demo.git").unwrap();
        store
            .create_ticket("demo.git", id, Change::new("alice"))
            .unwrap();
        let err = store
            .create_ticket("demo.git", id, Change::new("alice"))
            .unwrap_err();
        assert!(matches!(err, TicketStoreError::AlreadyExists { .. }));
    }

    #[test]
    fn update_of_missing_ticket_is_not_found() {
        let store = MemoryTicketService::new();
        let err = store
            .update_ticket("demo.git", TicketId::new(9).unwrap(), Change::new("alice"))
            .unwrap_err();
        assert!(matches!(err, TicketStoreError::NotFound { .. }));
    }

    #[test]
    fn journal_survives_encoding() {
        let mut first = Change::new("alice");
        first.fields.title = Some("Fix parser state reset".into());
        first.fields.status = Some(Status::New);
        let mut second = Change::new("bob");
        second.fields.status = Some(Status::Open);

        let encoded = encode_journal(&[first, second]).unwrap();
        assert_eq!(encoded.lines().count(), 2);

        let decoded = decode_journal(&encoded).unwrap();
        let ticket =
            Ticket::from_changes("demo.git", TicketId::new(1).unwrap(), decoded).unwrap();
        assert_eq!(ticket.created_by, "alice");
        assert_eq!(ticket.status, Status::Open);
    }

    #[test]
    fn ids_stay_ahead_of_direct_creates() {
        let store = MemoryTicketService::new();
        store
            .create_ticket("demo.git", TicketId::new(7).unwrap(), Change::new("alice"))
            .unwrap();
        let next = store.assign_new_id("demo.git").unwrap();
        assert_eq!(next.get(), 8);
    }
}
