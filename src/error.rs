//! Fatal errors of a migration run.
//!
//! Anything that can go wrong with a single document or index is an outcome
//! value, not one of these.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("refusing to run: pass --dry-run to preview or --force to migrate")]
    SafetyGate,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot connect to MongoDB: {0}")]
    Connect(#[source] StoreError),

    #[error("migration lock is held by {holder} since {since}")]
    LockHeld { holder: String, since: String },

    #[error("cannot acquire migration lock: {0}")]
    Lock(#[source] StoreError),

    #[error("cannot read collection '{collection}': {source}")]
    Read {
        collection: String,
        source: StoreError,
    },

    #[error("backup of '{collection}' to {path} failed: {source}")]
    Backup {
        collection: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("backup of '{collection}' could not be serialized: {source}")]
    BackupSerialize {
        collection: String,
        source: serde_json::Error,
    },
}
