//! Error types shared across the outbox crate
//!
//! Storage code works in `anyhow::Result` like the rest of the crate;
//! the types here are the ones callers need to match on.

use crate::delivery::DeliveryError;
use crate::models::{EmailId, Location};

/// Input rejected before anything is persisted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("SMTP host is required")]
    EmptyHost,

    #[error("SMTP port must be between 1 and 65535")]
    InvalidPort,

    #[error("Invalid {field} address: {address:?}")]
    InvalidAddress {
        field: &'static str,
        address: String,
    },

    #[error("At least one To, Cc or Bcc recipient is required")]
    NoRecipients,

    #[error("Invalid email id: {0:?}")]
    InvalidId(String),
}

/// Persisted data that can no longer be decoded
///
/// Raised by the storage backends inside an `anyhow::Error`; recovered
/// with [`OutboxError::from_storage`].
#[derive(Debug, thiserror::Error)]
#[error("Corrupt record in {location}: {detail}")]
pub struct CorruptRecord {
    pub location: Location,
    pub detail: String,
}

/// A lock guarding storage was poisoned by a panicking holder
#[derive(Debug, thiserror::Error)]
#[error("{0} lock poisoned")]
pub struct LockPoisoned(pub &'static str);

/// Errors produced by outbox operations
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Email {0} does not exist in the outbox or sent items")]
    NotFound(EmailId),

    #[error("Email {id} could not be delivered after {attempts} attempt(s): {source}")]
    Delivery {
        id: EmailId,
        attempts: u32,
        /// Emails moved to sent items earlier in the same dispatch pass
        sent: usize,
        #[source]
        source: DeliveryError,
    },

    #[error(transparent)]
    Corrupt(CorruptRecord),

    #[error(transparent)]
    Poisoned(LockPoisoned),

    #[error(transparent)]
    Storage(anyhow::Error),
}

impl OutboxError {
    /// Classify an error coming out of a storage backend
    pub fn from_storage(err: anyhow::Error) -> Self {
        let err = match err.downcast::<CorruptRecord>() {
            Ok(corrupt) => return OutboxError::Corrupt(corrupt),
            Err(err) => err,
        };
        match err.downcast::<LockPoisoned>() {
            Ok(poisoned) => OutboxError::Poisoned(poisoned),
            Err(err) => OutboxError::Storage(err),
        }
    }

    /// Whether this error is unexpected and must not be folded into a
    /// failed response
    pub fn is_fatal(&self) -> bool {
        matches!(self, OutboxError::Corrupt(_) | OutboxError::Poisoned(_))
    }
}

impl From<anyhow::Error> for OutboxError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_storage(err)
    }
}
