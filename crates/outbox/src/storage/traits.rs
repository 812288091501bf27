//! Storage trait definitions

use crate::models::{EmailId, EmailRecord, Location};
use anyhow::Result;

/// Result of deleting a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record was removed from the given store
    Removed(Location),
    /// Neither store held the record
    NotFound,
}

/// Result of moving a record from the outbox to sent items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The record is now in sent items and gone from the outbox
    Moved,
    /// The record was already in sent items (a repeated move is a no-op)
    AlreadySent,
    /// Neither store holds the record, e.g. it was deleted mid-dispatch
    Missing,
}

/// Trait for outbox storage operations
///
/// Both backends (SQLite and filesystem) implement the same contract:
/// a record is visible in exactly one of the two stores, inserts are
/// all-or-nothing, and moves never leave a record in both or neither.
pub trait OutboxStore: Send + Sync {
    /// Persist a new record into the outbox
    ///
    /// Either the record and all its recipients become visible, or
    /// nothing does.
    fn insert(&self, record: &EmailRecord) -> Result<()>;

    /// Remove a record from whichever store holds it
    fn delete(&self, id: &EmailId) -> Result<DeleteOutcome>;

    /// Snapshot of every record in a store, oldest first
    fn list(&self, location: Location) -> Result<Vec<EmailRecord>>;

    /// Find which store currently holds a record
    ///
    /// If an interrupted move left a copy in both, sent items wins.
    fn location_of(&self, id: &EmailId) -> Result<Option<Location>>;

    /// Move a delivered record from the outbox to sent items atomically
    fn move_to_sent(&self, id: &EmailId) -> Result<MoveOutcome>;

    /// Snapshot of the outbox
    fn list_outbox(&self) -> Result<Vec<EmailRecord>> {
        self.list(Location::Outbox)
    }

    /// Snapshot of sent items
    fn list_sent_items(&self) -> Result<Vec<EmailRecord>> {
        self.list(Location::SentItems)
    }
}
