//! Delivery capability used by the dispatcher
//!
//! The dispatcher only sees [`Mailer::deliver`] and its classified result;
//! the SMTP details live in [`SmtpMailer`].

mod smtp;

use std::error::Error as StdError;
use std::io;

use crate::models::EmailRecord;

pub use smtp::SmtpMailer;

/// Why a delivery attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection was closed mid-negotiation; safe to retry
    #[error("connection closed during negotiation: {0}")]
    Transient(String),

    /// Anything else; retrying will not help
    #[error("{0}")]
    Fatal(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Re-raise as fatal, e.g. once retries are exhausted
    pub fn into_fatal(self) -> Self {
        match self {
            DeliveryError::Transient(message) => {
                DeliveryError::Fatal(format!("connection closed during negotiation: {}", message))
            }
            fatal => fatal,
        }
    }

    /// Classify a transport error by its source chain
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        if is_connection_closed(err) {
            DeliveryError::Transient(err.to_string())
        } else {
            DeliveryError::Fatal(err.to_string())
        }
    }
}

/// Sends one email
pub trait Mailer: Send + Sync {
    fn deliver(&self, email: &EmailRecord) -> Result<(), DeliveryError>;
}

/// Whether an error chain contains an I/O error for a connection the
/// peer closed (TLS or protocol negotiation cut short)
pub fn is_connection_closed(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>()
            && matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
            )
        {
            return true;
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("smtp failure")]
    struct TransportError {
        #[source]
        source: io::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("send failed")]
    struct Outer {
        #[source]
        source: TransportError,
    }

    fn nested(kind: io::ErrorKind) -> Outer {
        Outer {
            source: TransportError {
                source: io::Error::new(kind, "net_io_connectionclosed"),
            },
        }
    }

    #[test]
    fn test_nested_connection_closed_is_transient() {
        let err = nested(io::ErrorKind::ConnectionReset);
        assert!(is_connection_closed(&err));
        assert!(DeliveryError::classify(&err).is_transient());

        let err = nested(io::ErrorKind::UnexpectedEof);
        assert!(DeliveryError::classify(&err).is_transient());
    }

    #[test]
    fn test_other_io_errors_are_fatal() {
        let err = nested(io::ErrorKind::PermissionDenied);
        assert!(!is_connection_closed(&err));
        assert_eq!(
            DeliveryError::classify(&err),
            DeliveryError::Fatal("send failed".to_string())
        );
    }

    #[test]
    fn test_non_io_errors_are_fatal() {
        let err = std::fmt::Error;
        assert!(!DeliveryError::classify(&err).is_transient());
    }

    #[test]
    fn test_into_fatal() {
        let err = DeliveryError::Transient("reset".to_string()).into_fatal();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("reset"));

        let fatal = DeliveryError::Fatal("550 rejected".to_string());
        assert_eq!(fatal.clone().into_fatal(), fatal);
    }
}
