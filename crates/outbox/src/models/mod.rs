//! Domain models for queued and sent emails

mod email;
mod location;

pub use email::{EmailAddress, EmailId, EmailRecord, NewEmail, SmtpSettings};
pub use location::Location;
