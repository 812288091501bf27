//! File-based outbox storage
//!
//! Directory structure:
//! ```text
//! outbox/
//!   9f1c2b3a-0d4e-4f5a-8b6c-7d8e9fa0b1c2.email   # full record as JSON
//! sent-items/
//!   5b7e1d2c-3a4f-4e6b-9c8d-0e1f2a3b4c5d.email
//! ```
//!
//! Files are written to a `.tmp` sibling and renamed into place, so a
//! reader never sees a half-written record.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, warn};

use super::traits::{DeleteOutcome, MoveOutcome, OutboxStore};
use crate::error::CorruptRecord;
use crate::models::{EmailId, EmailRecord, Location};

/// Extension of persisted record files
const RECORD_EXTENSION: &str = "email";

/// Extension of files still being written
const TEMP_EXTENSION: &str = "tmp";

/// File-based outbox storage, one JSON file per record
pub struct FileOutboxStore {
    outbox_dir: PathBuf,
    sent_items_dir: PathBuf,
}

impl FileOutboxStore {
    /// Create a store over the given directories
    ///
    /// Directories are created lazily on first write.
    pub fn new(outbox_dir: impl AsRef<Path>, sent_items_dir: impl AsRef<Path>) -> Self {
        Self {
            outbox_dir: outbox_dir.as_ref().to_path_buf(),
            sent_items_dir: sent_items_dir.as_ref().to_path_buf(),
        }
    }

    fn dir(&self, location: Location) -> &Path {
        match location {
            Location::Outbox => &self.outbox_dir,
            Location::SentItems => &self.sent_items_dir,
        }
    }

    /// File name for a record, e.g. `<id>.email`
    fn file_name(id: &EmailId) -> String {
        format!("{}.{}", id, RECORD_EXTENSION)
    }

    /// Get the file path for a record in a store
    fn record_path(&self, location: Location, id: &EmailId) -> PathBuf {
        self.dir(location).join(Self::file_name(id))
    }

    /// Write `data` to `path` atomically (write to temp, then rename)
    ///
    /// The temp file is named after the record, so one left behind by an
    /// interrupted write belongs to this record and is discarded.
    fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension(TEMP_EXTENSION);

        match fs::remove_file(&temp_path) {
            Ok(()) => warn!("Removed stale temp file {}", temp_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove stale temp file {}", temp_path.display())
                });
            }
        }

        let written = (|| -> io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e).with_context(|| format!("Failed to write {}", path.display()));
        }
        Ok(())
    }

    /// Copy a record across filesystems, verifying the copy before the
    /// caller removes the source
    fn copy_verified(source: &Path, target: &Path) -> Result<()> {
        let data = fs::read(source)
            .with_context(|| format!("Failed to read {}", source.display()))?;

        Self::write_atomic(target, &data)?;

        let written = fs::read(target)
            .with_context(|| format!("Failed to read back {}", target.display()))?;
        if written != data {
            let _ = fs::remove_file(target);
            anyhow::bail!(
                "Copy of {} to {} did not verify",
                source.display(),
                target.display()
            );
        }
        Ok(())
    }

    fn read_record(&self, location: Location, path: &Path) -> Result<EmailRecord> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

        let mut record: EmailRecord =
            serde_json::from_reader(io::BufReader::new(file)).map_err(|e| CorruptRecord {
                location,
                detail: format!("{}: {}", path.display(), e),
            })?;

        record.file = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string);
        Ok(record)
    }
}

impl OutboxStore for FileOutboxStore {
    fn insert(&self, record: &EmailRecord) -> Result<()> {
        fs::create_dir_all(&self.outbox_dir).with_context(|| {
            format!(
                "Failed to create outbox directory {}",
                self.outbox_dir.display()
            )
        })?;

        let path = self.record_path(Location::Outbox, &record.id);
        if path.exists() {
            anyhow::bail!("Email {} already exists in the outbox", record.id);
        }

        let mut record = record.clone();
        record.file = None;
        let data = serde_json::to_vec_pretty(&record).context("Failed to serialize email")?;

        Self::write_atomic(&path, &data)
    }

    fn delete(&self, id: &EmailId) -> Result<DeleteOutcome> {
        let mut outcome = DeleteOutcome::NotFound;

        // Outbox first, then sent items; both are cleared in case an
        // interrupted move left a copy in each.
        for location in Location::ALL {
            let path = self.record_path(location, id);
            match fs::remove_file(&path) {
                Ok(()) => {
                    if outcome == DeleteOutcome::NotFound {
                        outcome = DeleteOutcome::Removed(location);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to delete {}", path.display()));
                }
            }
        }

        Ok(outcome)
    }

    fn list(&self, location: Location) -> Result<Vec<EmailRecord>> {
        let dir = self.dir(location);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in
            fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            records.push(self.read_record(location, &path)?);
        }

        records.sort_by(|a, b| {
            a.queued_at
                .cmp(&b.queued_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(records)
    }

    fn location_of(&self, id: &EmailId) -> Result<Option<Location>> {
        if self.record_path(Location::SentItems, id).exists() {
            return Ok(Some(Location::SentItems));
        }
        if self.record_path(Location::Outbox, id).exists() {
            return Ok(Some(Location::Outbox));
        }
        Ok(None)
    }

    fn move_to_sent(&self, id: &EmailId) -> Result<MoveOutcome> {
        let source = self.record_path(Location::Outbox, id);
        let target = self.record_path(Location::SentItems, id);

        if !source.exists() {
            return Ok(if target.exists() {
                MoveOutcome::AlreadySent
            } else {
                MoveOutcome::Missing
            });
        }

        fs::create_dir_all(&self.sent_items_dir).with_context(|| {
            format!(
                "Failed to create sent items directory {}",
                self.sent_items_dir.display()
            )
        })?;

        if target.exists() {
            warn!("Email {} already in sent items, removing outbox copy", id);
            fs::remove_file(&source)
                .with_context(|| format!("Failed to remove {}", source.display()))?;
            return Ok(MoveOutcome::Moved);
        }

        match fs::rename(&source, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!("Cross-device move for email {}, copying", id);
                Self::copy_verified(&source, &target)?;
                fs::remove_file(&source)
                    .with_context(|| format!("Failed to remove {}", source.display()))?;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to move {} to {}", source.display(), target.display())
                });
            }
        }

        Ok(MoveOutcome::Moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailAddress, NewEmail, SmtpSettings};
    use tempfile::tempdir;

    fn create_test_store() -> (FileOutboxStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = FileOutboxStore::new(dir.path().join("outbox"), dir.path().join("sent-items"));
        (store, dir)
    }

    fn make_test_record(subject: &str) -> EmailRecord {
        NewEmail::builder(
            SmtpSettings {
                host: "smtp.example.com".to_string(),
                port: 25,
                username: String::new(),
                password: String::new(),
                enable_ssl: false,
            },
            EmailAddress::new("sender@example.com"),
        )
        .to(vec![EmailAddress::with_name("To", "to@example.com")])
        .cc(vec![EmailAddress::new("cc@example.com")])
        .subject(subject)
        .body("Plain body")
        .build()
        .into_record()
    }

    #[test]
    fn test_insert_creates_directory_lazily() {
        let (store, dir) = create_test_store();
        assert!(!dir.path().join("outbox").exists());

        let record = make_test_record("Lazy");
        store.insert(&record).unwrap();

        let path = dir
            .path()
            .join("outbox")
            .join(format!("{}.email", record.id));
        assert!(path.exists());
        assert!(!dir.path().join("sent-items").exists());
    }

    #[test]
    fn test_insert_and_list() {
        let (store, _dir) = create_test_store();

        let record = make_test_record("Hello");
        store.insert(&record).unwrap();

        let outbox = store.list_outbox().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].file, Some(format!("{}.email", record.id)));

        let mut loaded = outbox[0].clone();
        loaded.file = None;
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let (store, _dir) = create_test_store();
        assert!(store.list_outbox().unwrap().is_empty());
        assert!(store.list_sent_items().unwrap().is_empty());
    }

    #[test]
    fn test_list_ignores_temp_files() {
        let (store, dir) = create_test_store();

        let record = make_test_record("Complete");
        store.insert(&record).unwrap();

        // A write that died before its rename
        fs::write(
            dir.path().join("outbox").join("half-written.tmp"),
            b"{\"id\":",
        )
        .unwrap();

        let outbox = store.list_outbox().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].id, record.id);
    }

    #[test]
    fn test_list_orders_by_queue_time() {
        let (store, _dir) = create_test_store();

        let mut first = make_test_record("First");
        let second = make_test_record("Second");
        first.queued_at = second.queued_at - chrono::Duration::seconds(5);

        store.insert(&second).unwrap();
        store.insert(&first).unwrap();

        let subjects: Vec<_> = store
            .list_outbox()
            .unwrap()
            .into_iter()
            .map(|r| r.subject)
            .collect();
        assert_eq!(subjects, vec!["First", "Second"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (store, _dir) = create_test_store();

        let record = make_test_record("Once");
        store.insert(&record).unwrap();
        assert!(store.insert(&record).is_err());
        assert_eq!(store.list_outbox().unwrap().len(), 1);
    }

    #[test]
    fn test_move_to_sent() {
        let (store, dir) = create_test_store();

        let record = make_test_record("Move");
        store.insert(&record).unwrap();

        assert_eq!(store.move_to_sent(&record.id).unwrap(), MoveOutcome::Moved);
        assert!(store.list_outbox().unwrap().is_empty());
        assert_eq!(store.list_sent_items().unwrap().len(), 1);
        assert!(
            dir.path()
                .join("sent-items")
                .join(format!("{}.email", record.id))
                .exists()
        );

        assert_eq!(
            store.move_to_sent(&record.id).unwrap(),
            MoveOutcome::AlreadySent
        );
        assert_eq!(
            store.move_to_sent(&EmailId::generate()).unwrap(),
            MoveOutcome::Missing
        );
    }

    #[test]
    fn test_move_with_leftover_sent_copy() {
        let (store, dir) = create_test_store();

        let record = make_test_record("Interrupted");
        store.insert(&record).unwrap();

        // Simulate a copy that finished before the source was removed
        let sent_dir = dir.path().join("sent-items");
        fs::create_dir_all(&sent_dir).unwrap();
        fs::copy(
            dir.path().join("outbox").join(format!("{}.email", record.id)),
            sent_dir.join(format!("{}.email", record.id)),
        )
        .unwrap();

        assert_eq!(
            store.location_of(&record.id).unwrap(),
            Some(Location::SentItems)
        );
        assert_eq!(store.move_to_sent(&record.id).unwrap(), MoveOutcome::Moved);
        assert!(store.list_outbox().unwrap().is_empty());
        assert_eq!(store.list_sent_items().unwrap().len(), 1);
    }

    #[test]
    fn test_copy_verified() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.email");
        let target = dir.path().join("b.email");
        fs::write(&source, b"{\"payload\": true}").unwrap();

        FileOutboxStore::copy_verified(&source, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), fs::read(&source).unwrap());
        assert!(!dir.path().join("b.tmp").exists());
    }

    #[test]
    fn test_copy_verified_replaces_stale_temp_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.email");
        let target = dir.path().join("b.email");
        fs::write(&source, b"{\"payload\": true}").unwrap();
        // Left behind by a copy that crashed before its rename
        fs::write(dir.path().join("b.tmp"), b"{\"pay").unwrap();

        FileOutboxStore::copy_verified(&source, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), fs::read(&source).unwrap());
        assert!(!dir.path().join("b.tmp").exists());
    }

    #[test]
    fn test_delete_probes_both_directories() {
        let (store, _dir) = create_test_store();

        let queued = make_test_record("Queued");
        let sent = make_test_record("Sent");
        store.insert(&queued).unwrap();
        store.insert(&sent).unwrap();
        store.move_to_sent(&sent.id).unwrap();

        assert_eq!(
            store.delete(&queued.id).unwrap(),
            DeleteOutcome::Removed(Location::Outbox)
        );
        assert_eq!(
            store.delete(&sent.id).unwrap(),
            DeleteOutcome::Removed(Location::SentItems)
        );
        assert_eq!(store.delete(&sent.id).unwrap(), DeleteOutcome::NotFound);
    }

    #[test]
    fn test_corrupt_file_reported() {
        let (store, dir) = create_test_store();

        let record = make_test_record("Fine");
        store.insert(&record).unwrap();
        fs::write(
            dir.path()
                .join("outbox")
                .join(format!("{}.email", EmailId::generate())),
            b"not json",
        )
        .unwrap();

        let err = store.list_outbox().unwrap_err();
        let corrupt = err.downcast_ref::<CorruptRecord>().unwrap();
        assert_eq!(corrupt.location, Location::Outbox);
    }
}
