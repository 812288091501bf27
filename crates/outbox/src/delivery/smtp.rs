//! SMTP delivery via lettre
//!
//! Uses the blocking transport; the dispatcher is synchronous and sends
//! one email at a time. A transport is built per email because every
//! record carries its own SMTP settings.

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, SmtpTransport, Transport};
use log::debug;

use super::{DeliveryError, Mailer};
use crate::models::{EmailAddress, EmailRecord, SmtpSettings};

/// Port for implicit TLS (SMTPS); other ports upgrade with STARTTLS
const IMPLICIT_TLS_PORT: u16 = 465;

/// Mailer backed by a real SMTP server
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn transport(&self, smtp: &SmtpSettings) -> Result<SmtpTransport, DeliveryError> {
        let tls = if smtp.enable_ssl {
            let params = TlsParameters::new(smtp.host.clone())
                .map_err(|e| DeliveryError::Fatal(format!("Invalid TLS parameters: {}", e)))?;
            if smtp.port == IMPLICIT_TLS_PORT {
                Tls::Wrapper(params)
            } else {
                Tls::Required(params)
            }
        } else {
            Tls::None
        };

        let mut builder = SmtpTransport::builder_dangerous(smtp.host.as_str())
            .port(smtp.port)
            .tls(tls)
            .timeout(Some(self.timeout));

        if !smtp.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ));
        }

        Ok(builder.build())
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Mailer for SmtpMailer {
    fn deliver(&self, email: &EmailRecord) -> Result<(), DeliveryError> {
        let message = build_message(email)?;
        let transport = self.transport(&email.smtp)?;

        debug!(
            "Sending email {} via {}:{} to {} recipient(s)",
            email.id,
            email.smtp.host,
            email.smtp.port,
            email.recipient_count()
        );

        transport
            .send(&message)
            .map(|_| ())
            .map_err(|e| classify_smtp(&e))
    }
}

/// A response error without a status code means the server closed the
/// connection before finishing its reply
fn classify_smtp(err: &lettre::transport::smtp::Error) -> DeliveryError {
    if err.is_response() && err.status().is_none() {
        return DeliveryError::Transient(err.to_string());
    }
    DeliveryError::classify(err)
}

fn mailbox(addr: &EmailAddress) -> Result<Mailbox, DeliveryError> {
    let address: Address = addr
        .address
        .trim()
        .parse()
        .map_err(|e| DeliveryError::Fatal(format!("Invalid address {:?}: {}", addr.address, e)))?;
    Ok(Mailbox::new(addr.name.clone(), address))
}

/// Build the MIME message for a record
fn build_message(email: &EmailRecord) -> Result<Message, DeliveryError> {
    let mut builder = Message::builder()
        .from(mailbox(&email.from)?)
        .subject(email.subject.as_str());

    for addr in &email.to {
        builder = builder.to(mailbox(addr)?);
    }
    for addr in &email.cc {
        builder = builder.cc(mailbox(addr)?);
    }
    for addr in &email.bcc {
        builder = builder.bcc(mailbox(addr)?);
    }

    let content_type = if email.is_body_html {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };

    builder
        .header(content_type)
        .body(email.body.clone())
        .map_err(|e| DeliveryError::Fatal(format!("Failed to build message: {}", e)))
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::{Shutdown, TcpListener};
    use std::thread;

    use super::*;
    use crate::models::NewEmail;

    fn record(is_html: bool) -> EmailRecord {
        NewEmail::builder(
            SmtpSettings {
                host: "localhost".to_string(),
                port: 2525,
                username: String::new(),
                password: String::new(),
                enable_ssl: false,
            },
            EmailAddress::with_name("Sender", "sender@example.com"),
        )
        .to(vec![EmailAddress::new("to@example.com")])
        .cc(vec![EmailAddress::with_name("Copy", "cc@example.com")])
        .bcc(vec![EmailAddress::new("bcc@example.com")])
        .subject("Greetings")
        .body(if is_html { "<b>Hi</b>" } else { "Hi" })
        .html(is_html)
        .build()
        .into_record()
    }

    #[test]
    fn test_build_message_headers() {
        let message = build_message(&record(true)).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("Sender"));
        assert!(formatted.contains("<sender@example.com>"));
        assert!(formatted.contains("To: to@example.com"));
        assert!(formatted.contains("<cc@example.com>"));
        assert!(formatted.contains("Subject: Greetings"));
        assert!(formatted.contains("Content-Type: text/html"));
        // Bcc goes into the envelope only
        assert!(!formatted.contains("Bcc:"));

        let envelope = message.envelope();
        assert_eq!(envelope.to().len(), 3);
    }

    #[test]
    fn test_build_plain_text_message() {
        let message = build_message(&record(false)).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Content-Type: text/plain"));
    }

    #[test]
    fn test_invalid_address_is_fatal() {
        let mut email = record(false);
        email.to = vec![EmailAddress::new("nope")];

        let err = build_message(&email).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unreachable_server_is_fatal() {
        // Nothing listens on port 1; connection refused is not transient
        let mut email = record(false);
        email.smtp.port = 1;

        let mailer = SmtpMailer::new(Duration::from_secs(2));
        let err = mailer.deliver(&email).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_server_closing_during_ehlo_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"220 localhost ESMTP\r\n").unwrap();
            let mut ehlo = String::new();
            BufReader::new(stream.try_clone().unwrap())
                .read_line(&mut ehlo)
                .unwrap();
            stream.shutdown(Shutdown::Both).unwrap();
            ehlo
        });

        let mut email = record(false);
        email.smtp.host = "127.0.0.1".to_string();
        email.smtp.port = port;

        let mailer = SmtpMailer::new(Duration::from_secs(5));
        let err = mailer.deliver(&email).unwrap_err();

        assert!(server.join().unwrap().starts_with("EHLO"));
        assert!(err.is_transient(), "{}", err);
    }
}
