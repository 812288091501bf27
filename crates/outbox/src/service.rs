//! OutboxService facade
//!
//! The single entry point for front ends (the `outboxctl` CLI). Expected
//! failures (bad input, unknown ids, delivery and storage errors) come
//! back as `success: false` responses; only errors that point to broken
//! persisted data or a broken process are returned as `Err`.

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;

use crate::delivery::Mailer;
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::error::OutboxError;
use crate::models::{EmailId, EmailRecord, Location, NewEmail};
use crate::settings::OutboxSettings;
use crate::storage::{DeleteOutcome, OutboxStore, open_store};

/// Outcome of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Outcome of a list operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListResponse {
    pub success: bool,
    pub message: String,
    pub records: Vec<EmailRecord>,
}

impl ListResponse {
    fn success(message: impl Into<String>, records: Vec<EmailRecord>) -> Self {
        Self {
            success: true,
            message: message.into(),
            records,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            records: Vec::new(),
        }
    }
}

/// Turn an expected error into a failed response, propagate the rest
fn fold_error(err: OutboxError) -> Result<String> {
    if err.is_fatal() {
        return Err(err.into());
    }
    let message = match &err {
        OutboxError::Delivery { sent, .. } => {
            format!("{}; {} email(s) sent before the failure", err, sent)
        }
        _ => err.to_string(),
    };
    warn!("{}", message);
    Ok(message)
}

/// Main service object for outbox operations
pub struct OutboxService {
    store: Arc<dyn OutboxStore>,
    dispatcher: Dispatcher,
}

impl OutboxService {
    pub fn new(store: Arc<dyn OutboxStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Open the configured backend and wire it to `mailer`
    pub fn open(settings: &OutboxSettings, mailer: Arc<dyn Mailer>) -> Result<Self> {
        let store = open_store(settings)?;
        let dispatcher = Dispatcher::new(store.clone(), mailer, settings.retry_policy());
        Ok(Self::new(store, dispatcher))
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Validate and queue an email
    pub fn enqueue(&self, email: NewEmail) -> Result<Response> {
        if let Err(err) = email.validate() {
            return fold_error(err.into()).map(Response::failure);
        }

        let record = email.into_record();
        match self.store.insert(&record) {
            Ok(()) => {
                info!("Queued email {}", record.id);
                Ok(Response::success(format!("Email queued: {}", record.id)))
            }
            Err(err) => fold_error(OutboxError::from_storage(err)).map(Response::failure),
        }
    }

    /// Delete an email from the outbox or sent items
    pub fn delete(&self, id: &str) -> Result<Response> {
        let id = match EmailId::parse(id) {
            Ok(id) => id,
            Err(err) => return fold_error(err.into()).map(Response::failure),
        };

        match self.store.delete(&id) {
            Ok(DeleteOutcome::Removed(location)) => {
                info!("Deleted email {} from {}", id, location);
                Ok(Response::success(format!("Email {} deleted from {}", id, location)))
            }
            Ok(DeleteOutcome::NotFound) => {
                fold_error(OutboxError::NotFound(id)).map(Response::failure)
            }
            Err(err) => fold_error(OutboxError::from_storage(err)).map(Response::failure),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Deliver everything in the outbox
    pub fn dispatch_all(&self) -> Result<Response> {
        match self.dispatcher.dispatch_all() {
            Ok(stats) => Ok(Response::success(dispatch_message(&stats))),
            Err(err) => fold_error(err).map(Response::failure),
        }
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// List queued emails
    pub fn list_outbox(&self) -> Result<ListResponse> {
        self.list(Location::Outbox, "Outbox listed")
    }

    /// List delivered emails
    pub fn list_sent_items(&self) -> Result<ListResponse> {
        self.list(Location::SentItems, "Sent items listed")
    }

    fn list(&self, location: Location, message: &str) -> Result<ListResponse> {
        match self.store.list(location) {
            Ok(records) => Ok(ListResponse::success(message, records)),
            Err(err) => fold_error(OutboxError::from_storage(err)).map(ListResponse::failure),
        }
    }
}

fn dispatch_message(stats: &DispatchStats) -> String {
    if stats.queued == 0 {
        return "No emails to send".to_string();
    }
    if stats.skipped > 0 {
        format!("{} email(s) sent, {} skipped", stats.sent, stats.skipped)
    } else {
        format!("{} email(s) sent", stats.sent)
    }
}
