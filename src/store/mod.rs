//! The datastore seam the migration runs against.
//!
//! [`MongoStore`] talks to a live server. Tests use the in-memory store in
//! `memory`, which records every call so ordering and side effects can be
//! asserted without a database.

#[cfg(test)]
pub mod memory;
mod mongo;

pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use thiserror::Error;

/// Name of the lock sentinel and of the run record.
pub const MIGRATION_NAME: &str = "tenant-to-owner";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error("{0}")]
    Rejected(String),
}

/// Result of dropping an index. A missing index is not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexDrop {
    Dropped,
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquire {
    Acquired,
    Held { holder: String, since: String },
}

/// Advisory lock taken for the duration of a live run.
#[derive(Debug, Clone)]
pub struct LockRecord {
    pub name: &'static str,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(holder: impl Into<String>) -> Self {
        Self {
            name: MIGRATION_NAME,
            holder: holder.into(),
            acquired_at: Utc::now(),
        }
    }
}

/// Appended to the `migrations` collection after a live run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub name: &'static str,
    pub run_id: String,
    pub applied_at: DateTime<Utc>,
    pub updated: u64,
    pub errors: u64,
}

#[async_trait]
pub trait MigrationStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    /// Every document in `collection`, in natural order.
    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Documents in which `field` exists.
    async fn find_with_field(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count_with_field(&self, collection: &str, field: &str) -> Result<u64, StoreError>;

    /// Sets `ownerId` and unsets `tenantId` on the document `id`, provided it
    /// still carries `tenant`. Returns whether a document matched.
    async fn reassign_owner(
        &self,
        collection: &str,
        id: &Bson,
        tenant: &str,
        owner: &str,
    ) -> Result<bool, StoreError>;

    /// Unsets `tenantId` on the document `id`. Returns whether a document matched.
    async fn strip_tenant(&self, collection: &str, id: &Bson) -> Result<bool, StoreError>;

    async fn drop_index(&self, collection: &str, name: &str) -> IndexDrop;

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        name: &str,
    ) -> Result<(), StoreError>;

    async fn acquire_lock(&self, lock: &LockRecord) -> Result<LockAcquire, StoreError>;

    async fn release_lock(&self, lock: &LockRecord) -> Result<(), StoreError>;

    async fn record_run(&self, record: &RunRecord) -> Result<(), StoreError>;
}
