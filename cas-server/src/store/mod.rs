//! Ticket store: the single owner of ticket lifecycle.
//!
//! Two implementations share one contract:
//! - [`MemoryTicketStore`] - DashMap, single node
//! - [`SqliteTicketStore`] - sqlx SQLite, shared by every node of a cluster
//!
//! `consume` is the only way a use is recorded on a service ticket, and it
//! is a single atomic test-and-set in both implementations.

mod memory;
mod retry;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cas_core::{Ticket, TicketId, TicketKind};

pub use memory::MemoryTicketStore;
pub use retry::RetryingTicketStore;
pub use sqlite::SqliteTicketStore;

/// Predicate used by bulk operations.
pub type TicketPredicate<'a> = &'a (dyn Fn(&Ticket) -> bool + Send + Sync);

/// In-place modification applied under the store's lock.
pub type TicketModifier<'a> = &'a (dyn Fn(&mut Ticket) + Send + Sync);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("ticket {0} not found")]
    NotFound(TicketId),

    /// The ticket exists but is exhausted or expired.
    #[error("ticket {0} already consumed")]
    AlreadyConsumed(TicketId),

    /// A ticket with this id already exists.
    #[error("ticket {0} already exists")]
    Duplicate(TicketId),

    /// Infrastructure fault; may succeed on retry.
    #[error("ticket store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("corrupt ticket data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert a new ticket.
    async fn put(&self, ticket: &Ticket) -> Result<(), StoreError>;

    /// Insert several tickets; either all are stored or none.
    async fn put_all(&self, tickets: &[Ticket]) -> Result<(), StoreError>;

    async fn get(&self, id: &TicketId) -> Result<Ticket, StoreError>;

    /// Atomically read, modify and write back a ticket. Returns the new value.
    async fn modify(&self, id: &TicketId, f: TicketModifier<'_>) -> Result<Ticket, StoreError>;

    /// Remove a ticket. Returns false if it was already gone.
    async fn delete(&self, id: &TicketId) -> Result<bool, StoreError>;

    /// Remove several tickets, returning how many existed.
    async fn delete_many(&self, ids: &[TicketId]) -> Result<usize, StoreError>;

    /// Remove every ticket matching `predicate`, returning how many matched.
    async fn delete_all(&self, predicate: TicketPredicate<'_>) -> Result<usize, StoreError>;

    /// Record one use if the ticket is neither exhausted nor expired at `now`.
    ///
    /// This is one atomic test-and-set: of any number of concurrent callers
    /// for a single-use ticket, exactly one succeeds. Returns the ticket with
    /// the use recorded, `AlreadyConsumed` when no use is left, or `NotFound`.
    async fn consume(&self, id: &TicketId, now: DateTime<Utc>) -> Result<Ticket, StoreError>;

    /// All tickets, optionally of one kind.
    async fn list(&self, kind: Option<TicketKind>) -> Result<Vec<Ticket>, StoreError>;

    /// Remove tickets expired by their own policy at `now`. The cleaner's
    /// first pass; chain expiry is left to the caller.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.delete_all(&move |t: &Ticket| t.is_expired(now)).await
    }
}
