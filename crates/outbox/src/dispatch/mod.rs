//! Dispatch engine: deliver queued emails and move them to sent items
//!
//! A pass works on a snapshot of the outbox and is safe to re-run; emails
//! left behind by a failed pass are picked up by the next one.

mod dispatcher;
mod retry;

pub use dispatcher::{DispatchStats, Dispatcher, Sleeper};
pub use retry::{DeliveryFailure, RetryPolicy, deliver_with_retry};
