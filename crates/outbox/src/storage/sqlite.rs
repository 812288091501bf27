//! SQLite-based outbox storage
//!
//! Each email is one parent row plus three child row sets (To, Cc, Bcc).
//! The outbox and sent items are two parallel groups of four tables;
//! every mutation runs in a single transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{DeleteOutcome, MoveOutcome, OutboxStore};
use crate::error::{CorruptRecord, LockPoisoned};
use crate::models::{EmailAddress, EmailId, EmailRecord, Location, SmtpSettings};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Queued emails
            CREATE TABLE outbox (
                id TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                enable_ssl INTEGER NOT NULL DEFAULT 0,
                from_address TEXT NOT NULL,
                from_name TEXT,
                subject TEXT NOT NULL,
                body BLOB NOT NULL,  -- zstd compressed
                is_body_html INTEGER NOT NULL DEFAULT 0,
                queued_at TEXT NOT NULL
            );

            CREATE TABLE outbox_to (
                id TEXT NOT NULL,
                address TEXT NOT NULL,
                name TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (id, position),
                FOREIGN KEY (id) REFERENCES outbox(id) ON DELETE CASCADE
            );

            CREATE TABLE outbox_cc (
                id TEXT NOT NULL,
                address TEXT NOT NULL,
                name TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (id, position),
                FOREIGN KEY (id) REFERENCES outbox(id) ON DELETE CASCADE
            );

            CREATE TABLE outbox_bcc (
                id TEXT NOT NULL,
                address TEXT NOT NULL,
                name TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (id, position),
                FOREIGN KEY (id) REFERENCES outbox(id) ON DELETE CASCADE
            );

            -- Delivered emails, same shape as the outbox
            CREATE TABLE sent_items (
                id TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                enable_ssl INTEGER NOT NULL DEFAULT 0,
                from_address TEXT NOT NULL,
                from_name TEXT,
                subject TEXT NOT NULL,
                body BLOB NOT NULL,  -- zstd compressed
                is_body_html INTEGER NOT NULL DEFAULT 0,
                queued_at TEXT NOT NULL
            );

            CREATE TABLE sent_items_to (
                id TEXT NOT NULL,
                address TEXT NOT NULL,
                name TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (id, position),
                FOREIGN KEY (id) REFERENCES sent_items(id) ON DELETE CASCADE
            );

            CREATE TABLE sent_items_cc (
                id TEXT NOT NULL,
                address TEXT NOT NULL,
                name TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (id, position),
                FOREIGN KEY (id) REFERENCES sent_items(id) ON DELETE CASCADE
            );

            CREATE TABLE sent_items_bcc (
                id TEXT NOT NULL,
                address TEXT NOT NULL,
                name TEXT,
                position INTEGER NOT NULL,
                PRIMARY KEY (id, position),
                FOREIGN KEY (id) REFERENCES sent_items(id) ON DELETE CASCADE
            );
            "#,
        ),
    ])
}

/// Columns shared by the `outbox` and `sent_items` parent tables
const PARENT_COLUMNS: &str = "id, host, port, username, password, enable_ssl, \
     from_address, from_name, subject, body, is_body_html, queued_at";

/// Recipient row sets stored alongside each parent row
#[derive(Debug, Clone, Copy)]
enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    const ALL: [RecipientKind; 3] = [RecipientKind::To, RecipientKind::Cc, RecipientKind::Bcc];

    /// Child table for this kind, e.g. `sent_items_cc`
    fn table(self, location: Location) -> String {
        let suffix = match self {
            RecipientKind::To => "to",
            RecipientKind::Cc => "cc",
            RecipientKind::Bcc => "bcc",
        };
        format!("{}_{}", location.table(), suffix)
    }

    fn of(self, record: &EmailRecord) -> &[EmailAddress] {
        match self {
            RecipientKind::To => &record.to,
            RecipientKind::Cc => &record.cc,
            RecipientKind::Bcc => &record.bcc,
        }
    }
}

/// Parent row as read from the database, before decoding
struct ParentRow {
    id: String,
    smtp: SmtpSettings,
    from: EmailAddress,
    subject: String,
    body: Vec<u8>,
    is_body_html: bool,
    queued_at: String,
}

/// Attach the failing statement to an error, without parameter values
fn statement_context(sql: &str) -> String {
    format!("SQL statement failed: {}", sql.trim())
}

/// SQLite-based outbox storage
pub struct SqliteOutboxStore {
    conn: Mutex<Connection>,
    compression_level: i32,
}

impl SqliteOutboxStore {
    /// Open (or create) an outbox database at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL keeps readers unblocked during a dispatch pass; foreign_keys
        // is required for ON DELETE CASCADE on the recipient tables.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
            compression_level: 3,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::Error::new(LockPoisoned("SQLite connection")))
    }

    /// Save one recipient row set for a record
    fn save_recipients(
        &self,
        conn: &Connection,
        location: Location,
        kind: RecipientKind,
        id: &EmailId,
        recipients: &[EmailAddress],
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, address, name, position) VALUES (?1, ?2, ?3, ?4)",
            kind.table(location)
        );
        let mut stmt = conn.prepare(&sql).with_context(|| statement_context(&sql))?;

        for (i, addr) in recipients.iter().enumerate() {
            stmt.execute(params![id.as_str(), addr.address, addr.name, i as i64])
                .with_context(|| statement_context(&sql))?;
        }

        Ok(())
    }

    /// Load one recipient row set for a record
    fn load_recipients(
        &self,
        conn: &Connection,
        location: Location,
        kind: RecipientKind,
        id: &str,
    ) -> Result<Vec<EmailAddress>> {
        let sql = format!(
            "SELECT address, name FROM {} WHERE id = ?1 ORDER BY position",
            kind.table(location)
        );
        let mut stmt = conn.prepare(&sql).with_context(|| statement_context(&sql))?;

        let recipients = stmt
            .query_map([id], |row| {
                Ok(EmailAddress {
                    address: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(recipients)
    }

    /// Decode a parent row and attach its recipients
    fn load_record(
        &self,
        conn: &Connection,
        location: Location,
        row: ParentRow,
    ) -> Result<EmailRecord> {
        let corrupt = |detail: String| CorruptRecord { location, detail };

        let id = EmailId::parse(&row.id)
            .map_err(|_| corrupt(format!("invalid id {:?}", row.id)))?;

        let body = zstd::decode_all(row.body.as_slice())
            .map_err(|e| corrupt(format!("email {}: failed to decompress body: {}", id, e)))?;
        let body = String::from_utf8(body)
            .map_err(|_| corrupt(format!("email {}: body is not valid UTF-8", id)))?;

        let queued_at = DateTime::parse_from_rfc3339(&row.queued_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("email {}: invalid queued_at: {}", id, e)))?;

        let to = self.load_recipients(conn, location, RecipientKind::To, &row.id)?;
        let cc = self.load_recipients(conn, location, RecipientKind::Cc, &row.id)?;
        let bcc = self.load_recipients(conn, location, RecipientKind::Bcc, &row.id)?;

        Ok(EmailRecord {
            id,
            smtp: row.smtp,
            from: row.from,
            to,
            cc,
            bcc,
            subject: row.subject,
            body,
            is_body_html: row.is_body_html,
            queued_at,
            file: None,
        })
    }

    fn exists(&self, conn: &Connection, location: Location, id: &EmailId) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", location.table());
        let found = conn
            .query_row(&sql, [id.as_str()], |_| Ok(()))
            .optional()
            .with_context(|| statement_context(&sql))?;
        Ok(found.is_some())
    }
}

impl OutboxStore for SqliteOutboxStore {
    fn insert(&self, record: &EmailRecord) -> Result<()> {
        let body = zstd::encode_all(record.body.as_bytes(), self.compression_level)
            .context("Failed to compress body")?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let sql = format!(
            "INSERT INTO outbox ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            PARENT_COLUMNS
        );
        tx.execute(
            &sql,
            params![
                record.id.as_str(),
                record.smtp.host,
                record.smtp.port,
                record.smtp.username,
                record.smtp.password,
                record.smtp.enable_ssl,
                record.from.address,
                record.from.name,
                record.subject,
                body,
                record.is_body_html,
                record.queued_at.to_rfc3339(),
            ],
        )
        .with_context(|| statement_context(&sql))?;

        for kind in RecipientKind::ALL {
            self.save_recipients(&tx, Location::Outbox, kind, &record.id, kind.of(record))?;
        }

        // Dropping the transaction before this point rolls everything back
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, id: &EmailId) -> Result<DeleteOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // Delete from all eight tables unconditionally; the parent row
        // counts only tell the caller where the record was.
        let mut outcome = DeleteOutcome::NotFound;
        for location in Location::ALL {
            for kind in RecipientKind::ALL {
                let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table(location));
                tx.execute(&sql, [id.as_str()])
                    .with_context(|| statement_context(&sql))?;
            }

            let sql = format!("DELETE FROM {} WHERE id = ?1", location.table());
            let removed = tx
                .execute(&sql, [id.as_str()])
                .with_context(|| statement_context(&sql))?;
            if removed > 0 && outcome == DeleteOutcome::NotFound {
                outcome = DeleteOutcome::Removed(location);
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn list(&self, location: Location) -> Result<Vec<EmailRecord>> {
        let conn = self.conn()?;

        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            PARENT_COLUMNS,
            location.table()
        );
        let mut stmt = conn.prepare(&sql).with_context(|| statement_context(&sql))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ParentRow {
                    id: row.get(0)?,
                    smtp: SmtpSettings {
                        host: row.get(1)?,
                        port: row.get(2)?,
                        username: row.get(3)?,
                        password: row.get(4)?,
                        enable_ssl: row.get(5)?,
                    },
                    from: EmailAddress {
                        address: row.get(6)?,
                        name: row.get(7)?,
                    },
                    subject: row.get(8)?,
                    body: row.get(9)?,
                    is_body_html: row.get(10)?,
                    queued_at: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read {}", location))?;

        rows.into_iter()
            .map(|row| self.load_record(&conn, location, row))
            .collect()
    }

    fn location_of(&self, id: &EmailId) -> Result<Option<Location>> {
        let conn = self.conn()?;

        if self.exists(&conn, Location::SentItems, id)? {
            return Ok(Some(Location::SentItems));
        }
        if self.exists(&conn, Location::Outbox, id)? {
            return Ok(Some(Location::Outbox));
        }
        Ok(None)
    }

    fn move_to_sent(&self, id: &EmailId) -> Result<MoveOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if !self.exists(&tx, Location::Outbox, id)? {
            let outcome = if self.exists(&tx, Location::SentItems, id)? {
                MoveOutcome::AlreadySent
            } else {
                MoveOutcome::Missing
            };
            return Ok(outcome);
        }

        // OR IGNORE: a copy already in sent items is kept as-is, the
        // outbox copy is still removed below.
        let sql = format!(
            "INSERT OR IGNORE INTO sent_items ({cols}) SELECT {cols} FROM outbox WHERE id = ?1",
            cols = PARENT_COLUMNS
        );
        tx.execute(&sql, [id.as_str()])
            .with_context(|| statement_context(&sql))?;

        for kind in RecipientKind::ALL {
            let sql = format!(
                "INSERT OR IGNORE INTO {} (id, address, name, position) \
                 SELECT id, address, name, position FROM {} WHERE id = ?1",
                kind.table(Location::SentItems),
                kind.table(Location::Outbox)
            );
            tx.execute(&sql, [id.as_str()])
                .with_context(|| statement_context(&sql))?;
        }

        for kind in RecipientKind::ALL {
            let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table(Location::Outbox));
            tx.execute(&sql, [id.as_str()])
                .with_context(|| statement_context(&sql))?;
        }

        let sql = "DELETE FROM outbox WHERE id = ?1";
        tx.execute(sql, [id.as_str()])
            .with_context(|| statement_context(sql))?;

        tx.commit()?;
        Ok(MoveOutcome::Moved)
    }
}
