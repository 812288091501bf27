//! Storage traits and implementations
//!
//! This module defines the storage abstraction for queued and sent emails.
//! The trait-based design allows swapping between the SQLite and
//! filesystem backends; the choice is made once at startup from settings.

mod file;
mod sqlite;
mod traits;

use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::settings::{OutboxSettings, StorageKind};

pub use file::FileOutboxStore;
pub use sqlite::SqliteOutboxStore;
pub use traits::{DeleteOutcome, MoveOutcome, OutboxStore};

/// Open the backend selected by the settings
pub fn open_store(settings: &OutboxSettings) -> Result<Arc<dyn OutboxStore>> {
    match settings.storage {
        StorageKind::Sqlite => {
            info!(
                "Using SQLite storage at {}",
                settings.database_path.display()
            );
            Ok(Arc::new(SqliteOutboxStore::new(&settings.database_path)?))
        }
        StorageKind::FileSystem => {
            info!(
                "Using filesystem storage at {} and {}",
                settings.outbox_path.display(),
                settings.sent_items_path.display()
            );
            Ok(Arc::new(FileOutboxStore::new(
                &settings.outbox_path,
                &settings.sent_items_path,
            )))
        }
    }
}
