//! Bounded retry around a single delivery

use std::time::Duration;

use log::{debug, warn};

use crate::delivery::{DeliveryError, Mailer};
use crate::models::EmailRecord;

/// How often, and how far apart, delivery is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per email, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_millis(1000),
        }
    }
}

/// Delivery gave up on an email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Attempts made before giving up
    pub attempts: u32,
    /// Always fatal; exhausted transient errors are re-raised as fatal
    pub error: DeliveryError,
}

/// Deliver `email`, retrying transient failures
///
/// Makes at most `policy.max_attempts` attempts and sleeps `policy.interval`
/// between them (never after the last one). Fatal errors end the loop
/// immediately. Returns the number of attempts used on success.
pub fn deliver_with_retry(
    mailer: &dyn Mailer,
    email: &EmailRecord,
    policy: &RetryPolicy,
    sleep: &dyn Fn(Duration),
) -> Result<u32, DeliveryFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match mailer.deliver(email) {
            Ok(()) => {
                debug!("Email {} delivered on attempt {}", email.id, attempt);
                return Ok(attempt);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(
                    "Attempt {}/{} for email {} failed: {}; retrying in {:?}",
                    attempt, max_attempts, email.id, err, policy.interval
                );
                sleep(policy.interval);
            }
            Err(err) => {
                return Err(DeliveryFailure {
                    attempts: attempt,
                    error: err.into_fatal(),
                });
            }
        }
    }
}
