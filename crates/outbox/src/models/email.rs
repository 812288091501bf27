//! Email record model: what gets queued, persisted and delivered

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ValidationError;

/// Unique identifier for a queued email (UUID v4, hyphenated lowercase)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailId(String);

impl EmailId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an identifier supplied from outside the crate
    ///
    /// Only UUID text is accepted. The id doubles as a file stem in the
    /// filesystem backend, so anything else is rejected here.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Uuid::parse_str(s.trim())
            .map(|uuid| Self(uuid.hyphenated().to_string()))
            .map_err(|_| ValidationError::InvalidId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Email address (e.g., "john@example.com")
    pub address: String,
    /// Display name (e.g., "John Doe")
    #[serde(default)]
    pub name: Option<String>,
}

impl EmailAddress {
    /// Create a new email address with just the address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    fn check(&self, field: &'static str) -> Result<(), ValidationError> {
        self.address
            .trim()
            .parse::<lettre::Address>()
            .map(|_| ())
            .map_err(|_| ValidationError::InvalidAddress {
                field,
                address: self.address.clone(),
            })
    }
}

/// SMTP connection parameters, stored verbatim with each email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub enable_ssl: bool,
}

/// An email as submitted for queueing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmail {
    pub smtp: SmtpSettings,
    pub from: EmailAddress,
    #[serde(default)]
    pub to: Vec<EmailAddress>,
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_body_html: bool,
}

impl NewEmail {
    /// Create a new email builder
    pub fn builder(smtp: SmtpSettings, from: EmailAddress) -> NewEmailBuilder {
        NewEmailBuilder::new(smtp, from)
    }

    /// Reject input that could never be delivered
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.smtp.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        if self.smtp.port == 0 {
            return Err(ValidationError::InvalidPort);
        }

        self.from.check("from")?;
        for (field, addresses) in [("to", &self.to), ("cc", &self.cc), ("bcc", &self.bcc)] {
            for address in addresses {
                address.check(field)?;
            }
        }

        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(ValidationError::NoRecipients);
        }

        Ok(())
    }

    /// Assign an id and queue time, producing the record to persist
    pub fn into_record(self) -> EmailRecord {
        EmailRecord {
            id: EmailId::generate(),
            smtp: self.smtp,
            from: self.from,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            body: self.body,
            is_body_html: self.is_body_html,
            queued_at: Utc::now(),
            file: None,
        }
    }
}

/// Builder for creating NewEmail instances
pub struct NewEmailBuilder {
    email: NewEmail,
}

impl NewEmailBuilder {
    fn new(smtp: SmtpSettings, from: EmailAddress) -> Self {
        Self {
            email: NewEmail {
                smtp,
                from,
                to: Vec::new(),
                cc: Vec::new(),
                bcc: Vec::new(),
                subject: String::new(),
                body: String::new(),
                is_body_html: false,
            },
        }
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.email.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.email.cc = cc;
        self
    }

    pub fn bcc(mut self, bcc: Vec<EmailAddress>) -> Self {
        self.email.bcc = bcc;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.email.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.email.body = body.into();
        self
    }

    pub fn html(mut self, is_body_html: bool) -> Self {
        self.email.is_body_html = is_body_html;
        self
    }

    pub fn build(self) -> NewEmail {
        self.email
    }
}

/// A persisted email, in either the outbox or sent items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: EmailId,
    pub smtp: SmtpSettings,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub body: String,
    pub is_body_html: bool,
    /// When the email entered the outbox
    pub queued_at: DateTime<Utc>,
    /// File name relative to its store directory (filesystem backend only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl EmailRecord {
    /// The caller-supplied part of the record, without generated fields
    pub fn as_new_email(&self) -> NewEmail {
        NewEmail {
            smtp: self.smtp.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            cc: self.cc.clone(),
            bcc: self.bcc.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            is_body_html: self.is_body_html,
        }
    }

    /// Total number of recipients across To, Cc and Bcc
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}
