use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::retry::{RetryPolicy, deliver_with_retry};
use crate::delivery::Mailer;
use crate::error::OutboxError;
use crate::models::{EmailRecord, Location};
use crate::storage::{MoveOutcome, OutboxStore};

/// Sleep function used between delivery attempts
pub type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// Statistics from a dispatch pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Emails in the outbox when the pass started
    pub queued: usize,
    /// Emails delivered and moved to sent items
    pub sent: usize,
    /// Emails deleted or already sent by someone else during the pass
    pub skipped: usize,
    /// Delivery attempts across all emails
    pub attempts: u32,
    /// Duration of the pass
    pub duration_ms: u64,
}

/// Sends everything in the outbox and moves it to sent items
pub struct Dispatcher {
    store: Arc<dyn OutboxStore>,
    mailer: Arc<dyn Mailer>,
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn OutboxStore>, mailer: Arc<dyn Mailer>, policy: RetryPolicy) -> Self {
        Self {
            store,
            mailer,
            policy,
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// Replace the sleep between attempts
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Run one dispatch pass over a snapshot of the outbox
    ///
    /// Emails are handled one at a time in queue order. The first fatal
    /// delivery failure ends the pass; emails already sent stay in sent
    /// items and the rest stay in the outbox for the next pass.
    pub fn dispatch_all(&self) -> Result<DispatchStats, OutboxError> {
        let start = Instant::now();
        let mut stats = DispatchStats::default();

        let queued = self.store.list_outbox().map_err(OutboxError::from_storage)?;
        stats.queued = queued.len();

        if queued.is_empty() {
            debug!("Outbox is empty, nothing to dispatch");
            stats.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(stats);
        }

        info!("Dispatching {} queued email(s)", stats.queued);

        for email in &queued {
            self.dispatch_one(email, &mut stats)?;
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Dispatch complete: {} sent, {} skipped, {} attempt(s) in {}ms",
            stats.sent, stats.skipped, stats.attempts, stats.duration_ms
        );

        Ok(stats)
    }

    fn dispatch_one(
        &self,
        email: &EmailRecord,
        stats: &mut DispatchStats,
    ) -> Result<(), OutboxError> {
        // The snapshot may be stale: skip anything deleted or sent since
        match self
            .store
            .location_of(&email.id)
            .map_err(OutboxError::from_storage)?
        {
            Some(Location::Outbox) => {}
            Some(Location::SentItems) => {
                debug!("Email {} already in sent items, skipping", email.id);
                self.store
                    .move_to_sent(&email.id)
                    .map_err(OutboxError::from_storage)?;
                stats.skipped += 1;
                return Ok(());
            }
            None => {
                debug!("Email {} no longer exists, skipping", email.id);
                stats.skipped += 1;
                return Ok(());
            }
        }

        let attempts = match deliver_with_retry(
            self.mailer.as_ref(),
            email,
            &self.policy,
            &*self.sleeper,
        ) {
            Ok(attempts) => attempts,
            Err(failure) => {
                stats.attempts += failure.attempts;
                warn!(
                    "Giving up on email {} after {} attempt(s): {}",
                    email.id, failure.attempts, failure.error
                );
                return Err(OutboxError::Delivery {
                    id: email.id.clone(),
                    attempts: failure.attempts,
                    sent: stats.sent,
                    source: failure.error,
                });
            }
        };
        stats.attempts += attempts;

        match self
            .store
            .move_to_sent(&email.id)
            .map_err(OutboxError::from_storage)?
        {
            MoveOutcome::Moved => {
                debug!("Email {} moved to sent items", email.id);
                stats.sent += 1;
            }
            MoveOutcome::AlreadySent => {
                warn!("Email {} was moved to sent items during delivery", email.id);
                stats.skipped += 1;
            }
            MoveOutcome::Missing => {
                warn!("Email {} was deleted during delivery", email.id);
                stats.skipped += 1;
            }
        }

        Ok(())
    }
}
