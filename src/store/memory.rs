//! In-memory [`MigrationStore`] for tests.
//!
//! Every call is appended to an event log (`"find_all:patients"`,
//! `"write:bookings"`, ...) so tests can assert ordering, and faults can be
//! injected per document id, per collection read, or per index.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

use super::{IndexDrop, LockAcquire, LockRecord, MigrationStore, RunRecord, StoreError};

#[derive(Default)]
struct State {
    collections: BTreeMap<String, Vec<Document>>,
    indexes: BTreeMap<String, BTreeSet<String>>,
    lock: Option<(String, String)>,
    runs: Vec<RunRecord>,
    events: Vec<String>,
    failing_writes: HashSet<String>,
    failing_reads: HashSet<String>,
    failing_drops: HashSet<String>,
    failing_creates: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn id_key(id: &Bson) -> String {
    match id {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(self, collection: &str, docs: Vec<Document>) -> Self {
        self.state
            .lock()
            .unwrap()
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        self
    }

    pub fn with_index(self, collection: &str, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .indexes
            .entry(collection.to_string())
            .or_default()
            .insert(name.to_string());
        self
    }

    pub fn with_lock_held_by(self, holder: &str) -> Self {
        self.state.lock().unwrap().lock =
            Some((holder.to_string(), "2026-01-01T00:00:00Z".to_string()));
        self
    }

    pub fn fail_write_for(self, id: &str) -> Self {
        self.state.lock().unwrap().failing_writes.insert(id.to_string());
        self
    }

    pub fn fail_read_of(self, collection: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_reads
            .insert(collection.to_string());
        self
    }

    pub fn fail_drop_of(self, index: &str) -> Self {
        self.state.lock().unwrap().failing_drops.insert(index.to_string());
        self
    }

    pub fn fail_create_of(self, index: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_creates
            .insert(index.to_string());
        self
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn index_names(&self, collection: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .indexes
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    /// Number of calls that changed (or tried to change) stored data.
    pub fn mutations(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| {
                e.starts_with("write:")
                    || e.starts_with("drop_index:")
                    || e.starts_with("create_index:")
                    || e.starts_with("lock:")
                    || e.starts_with("record_run")
            })
            .count()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn lock_holder(&self) -> Option<String> {
        self.state.lock().unwrap().lock.as_ref().map(|(h, _)| h.clone())
    }

    fn update_where<F>(
        &self,
        collection: &str,
        id: &Bson,
        matches: impl Fn(&Document) -> bool,
        apply: F,
    ) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Document),
    {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("write:{collection}"));
        let key = id_key(id);
        if state.failing_writes.contains(&key) {
            return Err(StoreError::Rejected(format!("write to {key} rejected")));
        }
        let target = state
            .collections
            .get_mut(collection)
            .and_then(|docs| {
                docs.iter_mut()
                    .find(|d| d.get("_id").map(id_key).as_deref() == Some(key.as_str()))
            })
            .filter(|d| matches(d));
        match target {
            Some(doc) => {
                apply(doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("find_all:{collection}"));
        if state.failing_reads.contains(collection) {
            return Err(StoreError::Rejected(format!("read of {collection} rejected")));
        }
        Ok(state.collections.get(collection).cloned().unwrap_or_default())
    }

    async fn find_with_field(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("find_with_field:{collection}"));
        if state.failing_reads.contains(collection) {
            return Err(StoreError::Rejected(format!("read of {collection} rejected")));
        }
        Ok(state
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| d.contains_key(field)).cloned().collect())
            .unwrap_or_default())
    }

    async fn count_with_field(&self, collection: &str, field: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| d.contains_key(field)).count() as u64)
            .unwrap_or(0))
    }

    async fn reassign_owner(
        &self,
        collection: &str,
        id: &Bson,
        tenant: &str,
        owner: &str,
    ) -> Result<bool, StoreError> {
        self.update_where(
            collection,
            id,
            |d| d.get_str("tenantId").ok() == Some(tenant),
            |d| {
                d.insert("ownerId", owner);
                d.remove("tenantId");
            },
        )
    }

    async fn strip_tenant(&self, collection: &str, id: &Bson) -> Result<bool, StoreError> {
        self.update_where(
            collection,
            id,
            |d| d.contains_key("tenantId"),
            |d| {
                d.remove("tenantId");
            },
        )
    }

    async fn drop_index(&self, collection: &str, name: &str) -> IndexDrop {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("drop_index:{collection}:{name}"));
        if state.failing_drops.contains(name) {
            return IndexDrop::Failed(format!("drop of {name} rejected"));
        }
        match state
            .indexes
            .get_mut(collection)
            .map(|names| names.remove(name))
        {
            Some(true) => IndexDrop::Dropped,
            _ => IndexDrop::NotFound,
        }
    }

    async fn create_index(
        &self,
        collection: &str,
        _keys: Document,
        name: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("create_index:{collection}:{name}"));
        if state.failing_creates.contains(name) {
            return Err(StoreError::Rejected(format!("create of {name} rejected")));
        }
        state
            .indexes
            .entry(collection.to_string())
            .or_default()
            .insert(name.to_string());
        Ok(())
    }

    async fn acquire_lock(&self, lock: &LockRecord) -> Result<LockAcquire, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some((holder, since)) = &state.lock {
            return Ok(LockAcquire::Held {
                holder: holder.clone(),
                since: since.clone(),
            });
        }
        state.events.push("lock:acquire".to_string());
        state.lock = Some((lock.holder.clone(), lock.acquired_at.to_rfc3339()));
        Ok(LockAcquire::Acquired)
    }

    async fn release_lock(&self, lock: &LockRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.events.push("lock:release".to_string());
        let held_by_us = matches!(&state.lock, Some((holder, _)) if *holder == lock.holder);
        if !held_by_us {
            return Err(StoreError::Rejected(format!(
                "lock is not held by {}",
                lock.holder
            )));
        }
        state.lock = None;
        Ok(())
    }

    async fn record_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.events.push("record_run".to_string());
        state.runs.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drop_index_reports_each_state_once() {
        let store = MemoryStore::new().with_index("patients", "tenantId_1_phone_1");
        assert_eq!(store.drop_index("patients", "tenantId_1_phone_1").await, IndexDrop::Dropped);
        assert_eq!(store.drop_index("patients", "tenantId_1_phone_1").await, IndexDrop::NotFound);
        assert_eq!(store.drop_index("staff", "tenantId_1_isActive_1").await, IndexDrop::NotFound);
        assert!(store.index_names("patients").is_empty());
    }
}
