//! tickets
//!
//! The ticket store boundary and the notification queue.
//!
//! The receive pipeline produces [`crate::core::ticket::Change`]s;
//! everything about persisting them lives behind [`TicketService`]. An
//! in-memory store ships here for embedding and tests; a production
//! server supplies its own backend.

pub mod notifier;
pub mod service;

pub use notifier::{NotificationQueue, Notifier};
pub use service::{
    decode_journal, encode_journal, MemoryTicketService, TicketService, TicketStoreError,
};
