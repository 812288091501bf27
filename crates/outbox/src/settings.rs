//! Settings for the outbox: storage backend, paths and retry policy
//!
//! Loaded in order of priority:
//! 1. An explicit JSON file (e.g. `outboxctl --config path`)
//! 2. ~/.config/outbox/outbox.json
//! 3. Built-in defaults
//!
//! `OUTBOX_*` environment variables are applied on top of whichever
//! source was used.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::RetryPolicy;

/// Settings filename in the outbox config directory
pub const SETTINGS_FILE: &str = "outbox.json";

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Relational backend (SQLite)
    #[serde(rename = "sqlite", alias = "db", alias = "Db")]
    Sqlite,
    /// One JSON file per email in two directories
    #[serde(rename = "filesystem", alias = "fs", alias = "FileSystem")]
    FileSystem,
}

/// Unknown storage backend name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Invalid storage {0:?}; allowed values are \"sqlite\" (or \"db\") and \"filesystem\" (or \"fs\")"
)]
pub struct InvalidStorageKind(pub String);

impl FromStr for StorageKind {
    type Err = InvalidStorageKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "db" => Ok(StorageKind::Sqlite),
            "filesystem" | "fs" => Ok(StorageKind::FileSystem),
            _ => Err(InvalidStorageKind(s.to_string())),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageKind::Sqlite => "sqlite",
            StorageKind::FileSystem => "filesystem",
        })
    }
}

/// Retry settings as they appear in the settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Delivery attempts per email before giving up
    pub max_attempts: u32,
    /// Fixed pause between attempts, in milliseconds
    pub interval_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            interval_ms: policy.interval.as_millis() as u64,
        }
    }
}

/// Outbox settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub storage: StorageKind,
    /// SQLite database file (sqlite backend)
    pub database_path: PathBuf,
    /// Directory of queued emails (filesystem backend)
    pub outbox_path: PathBuf,
    /// Directory of delivered emails (filesystem backend)
    pub sent_items_path: PathBuf,
    pub retry: RetrySettings,
    /// SMTP connection timeout in seconds
    pub smtp_timeout_secs: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        let root = config::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::rooted_at(root)
    }
}

impl OutboxSettings {
    /// Default settings with every path under `root`
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            storage: StorageKind::Sqlite,
            database_path: root.join("outbox.sqlite"),
            outbox_path: root.join("outbox"),
            sent_items_path: root.join("sent-items"),
            retry: RetrySettings::default(),
            smtp_timeout_secs: 30,
        }
    }

    /// Load settings from an explicit file, or the default locations
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut settings: Self = match path {
            Some(path) => config::load_json_file(path)?,
            None if config::config_exists(SETTINGS_FILE) => config::load_json(SETTINGS_FILE)?,
            None => Self::default(),
        };

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply `OUTBOX_*` overrides using the given variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(storage) = lookup("OUTBOX_STORAGE") {
            self.storage = storage.parse()?;
        }
        if let Some(path) = lookup("OUTBOX_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("OUTBOX_OUTBOX_PATH") {
            self.outbox_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("OUTBOX_SENT_ITEMS_PATH") {
            self.sent_items_path = PathBuf::from(path);
        }
        if let Some(attempts) = lookup("OUTBOX_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts
                .trim()
                .parse()
                .with_context(|| format!("OUTBOX_MAX_ATTEMPTS is not a number: {:?}", attempts))?;
        }
        if let Some(interval) = lookup("OUTBOX_RETRY_INTERVAL_MS") {
            self.retry.interval_ms = interval.trim().parse().with_context(|| {
                format!("OUTBOX_RETRY_INTERVAL_MS is not a number: {:?}", interval)
            })?;
        }
        Ok(())
    }

    /// Retry policy for the dispatcher
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            interval: Duration::from_millis(self.retry.interval_ms),
        }
    }

    /// SMTP connection timeout
    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_secs)
    }

    /// Write these settings to ~/.config/outbox/outbox.json
    pub fn save(&self) -> Result<PathBuf> {
        config::save_json(SETTINGS_FILE, self)
    }

    /// Get the default settings file path (~/.config/outbox/outbox.json)
    pub fn default_settings_path() -> Option<PathBuf> {
        config::config_path(SETTINGS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = OutboxSettings::rooted_at("/var/lib/outbox");
        assert_eq!(settings.storage, StorageKind::Sqlite);
        assert_eq!(
            settings.database_path,
            PathBuf::from("/var/lib/outbox/outbox.sqlite")
        );
        assert_eq!(
            settings.sent_items_path,
            PathBuf::from("/var/lib/outbox/sent-items")
        );

        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 100);
        assert_eq!(policy.interval, Duration::from_millis(1000));
        assert_eq!(settings.smtp_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_storage_kind() {
        assert_eq!("Db".parse::<StorageKind>().unwrap(), StorageKind::Sqlite);
        assert_eq!("sqlite".parse::<StorageKind>().unwrap(), StorageKind::Sqlite);
        assert_eq!(
            "FileSystem".parse::<StorageKind>().unwrap(),
            StorageKind::FileSystem
        );
        assert_eq!("fs".parse::<StorageKind>().unwrap(), StorageKind::FileSystem);

        let err = "postgres".parse::<StorageKind>().unwrap_err();
        assert!(err.to_string().contains("allowed values"));
    }

    #[test]
    fn test_parse_settings_json() {
        let json = r#"{
            "storage": "filesystem",
            "outbox_path": "/tmp/out",
            "retry": { "max_attempts": 5 }
        }"#;

        let settings: OutboxSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.storage, StorageKind::FileSystem);
        assert_eq!(settings.outbox_path, PathBuf::from("/tmp/out"));
        assert_eq!(settings.retry.max_attempts, 5);
        // Unspecified fields keep their defaults
        assert_eq!(settings.retry.interval_ms, 1000);
    }

    #[test]
    fn test_legacy_storage_names_in_json() {
        let settings: OutboxSettings = serde_json::from_str(r#"{ "storage": "Db" }"#).unwrap();
        assert_eq!(settings.storage, StorageKind::Sqlite);
        let settings: OutboxSettings =
            serde_json::from_str(r#"{ "storage": "FileSystem" }"#).unwrap();
        assert_eq!(settings.storage, StorageKind::FileSystem);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = OutboxSettings::rooted_at("/data");
        settings
            .apply_overrides(lookup(&[
                ("OUTBOX_STORAGE", "fs"),
                ("OUTBOX_SENT_ITEMS_PATH", "/mnt/sent"),
                ("OUTBOX_MAX_ATTEMPTS", "3"),
                ("OUTBOX_RETRY_INTERVAL_MS", "250"),
            ]))
            .unwrap();

        assert_eq!(settings.storage, StorageKind::FileSystem);
        assert_eq!(settings.sent_items_path, PathBuf::from("/mnt/sent"));
        assert_eq!(settings.outbox_path, PathBuf::from("/data/outbox"));
        assert_eq!(settings.retry_policy().max_attempts, 3);
        assert_eq!(settings.retry_policy().interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_env_override() {
        let mut settings = OutboxSettings::rooted_at("/data");
        assert!(
            settings
                .apply_overrides(lookup(&[("OUTBOX_STORAGE", "mongo")]))
                .is_err()
        );
        assert!(
            settings
                .apply_overrides(lookup(&[("OUTBOX_MAX_ATTEMPTS", "many")]))
                .is_err()
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        let mut expected = OutboxSettings::rooted_at(dir.path());
        expected.storage = StorageKind::FileSystem;
        config::save_json_file(&path, &expected).unwrap();

        let loaded: OutboxSettings = config::load_json_file(&path).unwrap();
        assert_eq!(loaded, expected);
    }
}
