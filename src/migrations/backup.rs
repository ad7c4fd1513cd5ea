//! Pre-mutation snapshots.
//!
//! One pretty-printed JSON array per collection, in relaxed Extended JSON so
//! ObjectIds and dates survive a manual restore. Files are created with
//! `create_new` and never overwritten.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::MigrationError;
use crate::store::MigrationStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub collection: String,
    pub path: PathBuf,
    pub document_count: usize,
}

/// `<collection>_<stamp>_<run id>.json`; the run id keeps two runs in the
/// same second apart.
pub fn backup_file_name(collection: &str, stamp: DateTime<Utc>, run_id: &str) -> String {
    format!("{}_{}_{}.json", collection, stamp.format("%Y%m%dT%H%M%SZ"), run_id)
}

pub fn to_json(docs: &[Document]) -> Result<Vec<u8>, serde_json::Error> {
    let values: Vec<serde_json::Value> = docs
        .iter()
        .map(|d| Bson::Document(d.clone()).into_relaxed_extjson())
        .collect();
    serde_json::to_vec_pretty(&values)
}

pub async fn write_snapshot(
    dir: &Path,
    collection: &str,
    stamp: DateTime<Utc>,
    run_id: &str,
    docs: &[Document],
) -> Result<BackupSnapshot, MigrationError> {
    let path = dir.join(backup_file_name(collection, stamp, run_id));
    let io_err = |source| MigrationError::Backup {
        collection: collection.to_string(),
        path: path.clone(),
        source,
    };

    let body = to_json(docs).map_err(|source| MigrationError::BackupSerialize {
        collection: collection.to_string(),
        source,
    })?;

    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(io_err)?;
    file.write_all(&body).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;

    Ok(BackupSnapshot {
        collection: collection.to_string(),
        path,
        document_count: docs.len(),
    })
}

/// Snapshots every collection in order. The first failure aborts.
pub async fn snapshot_all<S>(
    store: &S,
    collections: &[&str],
    dir: &Path,
    stamp: DateTime<Utc>,
    run_id: &str,
) -> Result<Vec<BackupSnapshot>, MigrationError>
where
    S: MigrationStore + ?Sized,
{
    let mut snapshots = Vec::with_capacity(collections.len());
    for collection in collections {
        let docs = store
            .find_all(collection)
            .await
            .map_err(|source| MigrationError::Read {
                collection: collection.to_string(),
                source,
            })?;
        let snapshot = write_snapshot(dir, collection, stamp, run_id, &docs).await?;
        info!(
            collection = %collection,
            documents = snapshot.document_count,
            path = %snapshot.path.display(),
            "Backup written"
        );
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}
