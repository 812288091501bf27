//! Outbox crate - transactional email outbox
//!
//! This crate provides:
//! - Email record model and input validation
//! - Storage trait with SQLite and filesystem backends
//! - SMTP delivery via lettre
//! - Dispatch engine with bounded retry of transient failures
//! - `OutboxService` facade used by front ends
//!
//! Every queued email lives in exactly one place at a time: the outbox
//! until it is delivered, sent items afterwards.

pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod service;
pub mod settings;
pub mod storage;

pub use delivery::{DeliveryError, Mailer, SmtpMailer};
pub use dispatch::{DispatchStats, Dispatcher, RetryPolicy};
pub use error::{CorruptRecord, LockPoisoned, OutboxError, ValidationError};
pub use models::{EmailAddress, EmailId, EmailRecord, Location, NewEmail, SmtpSettings};
pub use service::{ListResponse, OutboxService, Response};
pub use settings::{OutboxSettings, StorageKind};
pub use storage::{
    DeleteOutcome, FileOutboxStore, MoveOutcome, OutboxStore, SqliteOutboxStore, open_store,
};
