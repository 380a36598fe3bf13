//! tickets::notifier
//!
//! Deferred ticket notifications.
//!
//! The pipeline queues a ticket whenever a change lands; the queue is
//! flushed exactly once at the end of the push so one push producing
//! several changes to the same ticket sends one notification.

use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::info;

use crate::core::types::TicketId;

/// A sink accepting tickets for deferred notification.
pub trait Notifier: Send + Sync {
    /// Queue a ticket for notification.
    fn queue(&self, repository: &str, ticket: TicketId);

    /// Deliver everything queued since the last flush.
    fn flush(&self);
}

/// The default notifier: deduplicates queued tickets and hands them to
/// a delivery callback on flush.
///
/// The hosting server supplies the callback (mail, webhooks); the
/// default construction just logs.
pub struct NotificationQueue {
    pending: Mutex<BTreeSet<(String, TicketId)>>,
    deliver: Box<dyn Fn(&str, TicketId) + Send + Sync>,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(|repository, ticket| {
            info!(repository, ticket = %ticket, "ticket notification");
        })
    }
}

impl NotificationQueue {
    pub fn new(deliver: impl Fn(&str, TicketId) + Send + Sync + 'static) -> Self {
        Self {
            pending: Mutex::new(BTreeSet::new()),
            deliver: Box::new(deliver),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().expect("notifier lock poisoned").len()
    }
}

impl Notifier for NotificationQueue {
    fn queue(&self, repository: &str, ticket: TicketId) {
        self.pending
            .lock()
            .expect("notifier lock poisoned")
            .insert((repository.to_string(), ticket));
    }

    fn flush(&self) {
        let drained = std::mem::take(&mut *self.pending.lock().expect("notifier lock poisoned"));
        for (repository, ticket) in drained {
            (self.deliver)(&repository, ticket);
        }
    }
}
