use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as MongoDateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::Instrument;

use super::{IndexDrop, LockAcquire, LockRecord, MigrationStore, RunRecord, StoreError};
use crate::config::Settings;
use crate::metrics::db_span;

const LOCK_COLLECTION: &str = "migration_locks";
const RUN_COLLECTION: &str = "migrations";

// Server error codes.
const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_NOT_FOUND: i32 = 27;
const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Builds the client and pings the server so an unreachable database
    /// fails here rather than in the first read.
    pub async fn connect(settings: &Settings) -> Result<Self, StoreError> {
        let timeout = Duration::from_millis(settings.connect_timeout_ms);
        let mut client_options = ClientOptions::parse(&settings.mongodb_uri).await?;
        client_options.app_name = Some("reserva-migrate".to_string());
        client_options.max_pool_size = Some(settings.max_pool_size);
        client_options.connect_timeout = Some(timeout);
        client_options.server_selection_timeout = Some(timeout);
        client_options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());

        let client = Client::with_options(client_options)?;
        let store = Self {
            db: client.database(&settings.database),
        };
        store.ping().await?;
        Ok(store)
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }
}

fn has_field(field: &str) -> Document {
    let mut filter = Document::new();
    filter.insert(field, doc! { "$exists": true });
    filter
}

fn is_missing_index(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => {
            command.code == INDEX_NOT_FOUND || command.code == NAMESPACE_NOT_FOUND
        }
        _ => false,
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl MigrationStore for MongoStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .instrument(db_span("ping", "admin"))
            .await?;
        Ok(())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        async {
            let cursor = self.collection(collection).find(None, None).await?;
            let docs: Vec<Document> = cursor.try_collect().await?;
            Ok::<_, StoreError>(docs)
        }
        .instrument(db_span("find_all", collection))
        .await
    }

    async fn find_with_field(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<Vec<Document>, StoreError> {
        async {
            let cursor = self
                .collection(collection)
                .find(has_field(field), None)
                .await?;
            let docs: Vec<Document> = cursor.try_collect().await?;
            Ok::<_, StoreError>(docs)
        }
        .instrument(db_span("find_with_field", collection))
        .await
    }

    async fn count_with_field(&self, collection: &str, field: &str) -> Result<u64, StoreError> {
        let count = self
            .collection(collection)
            .count_documents(has_field(field), None)
            .instrument(db_span("count", collection))
            .await?;
        Ok(count)
    }

    async fn reassign_owner(
        &self,
        collection: &str,
        id: &Bson,
        tenant: &str,
        owner: &str,
    ) -> Result<bool, StoreError> {
        let result = self
            .collection(collection)
            .update_one(
                doc! { "_id": id.clone(), "tenantId": tenant },
                doc! { "$set": { "ownerId": owner }, "$unset": { "tenantId": "" } },
                None,
            )
            .instrument(db_span("reassign_owner", collection))
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn strip_tenant(&self, collection: &str, id: &Bson) -> Result<bool, StoreError> {
        let result = self
            .collection(collection)
            .update_one(
                doc! { "_id": id.clone(), "tenantId": { "$exists": true } },
                doc! { "$unset": { "tenantId": "" } },
                None,
            )
            .instrument(db_span("strip_tenant", collection))
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> IndexDrop {
        let result = self
            .collection(collection)
            .drop_index(name, None)
            .instrument(db_span("drop_index", collection))
            .await;
        match result {
            Ok(()) => IndexDrop::Dropped,
            Err(e) if is_missing_index(&e) => IndexDrop::NotFound,
            Err(e) => IndexDrop::Failed(e.to_string()),
        }
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: Document,
        name: &str,
    ) -> Result<(), StoreError> {
        let index_model = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().name(name.to_string()).build())
            .build();
        self.collection(collection)
            .create_index(index_model, None)
            .instrument(db_span("create_index", collection))
            .await?;
        Ok(())
    }

    async fn acquire_lock(&self, lock: &LockRecord) -> Result<LockAcquire, StoreError> {
        let locks = self.collection(LOCK_COLLECTION);
        let sentinel = doc! {
            "_id": lock.name,
            "holder": &lock.holder,
            "acquired_at": MongoDateTime::from_millis(lock.acquired_at.timestamp_millis()),
        };
        match locks.insert_one(sentinel, None).await {
            Ok(_) => Ok(LockAcquire::Acquired),
            Err(e) if is_duplicate_key(&e) => {
                let current = locks.find_one(doc! { "_id": lock.name }, None).await?;
                let holder = current
                    .as_ref()
                    .and_then(|d| d.get_str("holder").ok())
                    .unwrap_or("unknown")
                    .to_string();
                let since = current
                    .as_ref()
                    .and_then(|d| d.get_datetime("acquired_at").ok())
                    .map(|dt| dt.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Ok(LockAcquire::Held { holder, since })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release_lock(&self, lock: &LockRecord) -> Result<(), StoreError> {
        let result = self
            .collection(LOCK_COLLECTION)
            .delete_one(doc! { "_id": lock.name, "holder": &lock.holder }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(StoreError::Rejected(format!(
                "lock '{}' is not held by {}",
                lock.name, lock.holder
            )));
        }
        Ok(())
    }

    async fn record_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.collection(RUN_COLLECTION)
            .insert_one(
                doc! {
                    "name": record.name,
                    "run_id": &record.run_id,
                    "applied_at": MongoDateTime::from_millis(record.applied_at.timestamp_millis()),
                    "updated": record.updated as i64,
                    "errors": record.errors as i64,
                },
                None,
            )
            .instrument(db_span("insert", RUN_COLLECTION))
            .await?;
        Ok(())
    }
}
