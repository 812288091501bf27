//! Which store currently holds a record

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two stores a record can live in
///
/// A record's location is never persisted as a field; it is whichever
/// store returns the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// Queued, waiting for dispatch
    Outbox,
    /// Delivered
    SentItems,
}

impl Location {
    /// Both locations, outbox first
    pub const ALL: [Location; 2] = [Location::Outbox, Location::SentItems];

    /// Parent table name in the relational backend
    pub fn table(&self) -> &'static str {
        match self {
            Location::Outbox => "outbox",
            Location::SentItems => "sent_items",
        }
    }

    /// Human readable label used in service messages
    pub fn label(&self) -> &'static str {
        match self {
            Location::Outbox => "outbox",
            Location::SentItems => "sent items",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
