//! Compound indexes keyed on `tenantId` and their `ownerId` replacements.

use mongodb::bson::Document;
use tracing::{info, warn};

use super::{RunMode, OWNER_FIELD, TENANT_FIELD};
use crate::store::{IndexDrop, MigrationStore};

/// One compound index: the tenant/owner key followed by `trailing`.
#[derive(Debug, Clone, Copy)]
pub struct IndexSpec {
    pub collection: &'static str,
    pub trailing: &'static [(&'static str, i32)],
}

pub const INDEX_SPECS: &[IndexSpec] = &[
    IndexSpec { collection: "patients", trailing: &[("phone", 1)] },
    IndexSpec { collection: "patients", trailing: &[("createdAt", -1)] },
    IndexSpec { collection: "bookings", trailing: &[("appointmentDate", 1)] },
    IndexSpec { collection: "bookings", trailing: &[("status", 1), ("appointmentDate", 1)] },
    IndexSpec { collection: "staff", trailing: &[("isActive", 1)] },
    IndexSpec { collection: "treatments", trailing: &[("category", 1)] },
    IndexSpec { collection: "withdrawals", trailing: &[("createdAt", -1)] },
];

impl IndexSpec {
    fn keys(&self, lead: &str) -> Document {
        let mut keys = Document::new();
        keys.insert(lead, 1);
        for (field, direction) in self.trailing {
            keys.insert(*field, *direction);
        }
        keys
    }

    pub fn old_keys(&self) -> Document {
        self.keys(TENANT_FIELD)
    }

    pub fn new_keys(&self) -> Document {
        self.keys(OWNER_FIELD)
    }

    pub fn old_name(&self) -> String {
        default_index_name(&self.old_keys())
    }

    pub fn new_name(&self) -> String {
        default_index_name(&self.new_keys())
    }
}

/// MongoDB's generated name for a key pattern, e.g. `tenantId_1_createdAt_-1`.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction))
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCreate {
    Created,
    Planned,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOutcome {
    pub collection: String,
    pub old_name: String,
    pub new_name: String,
    /// `None` in a dry run.
    pub drop: Option<IndexDrop>,
    pub create: IndexCreate,
}

impl IndexOutcome {
    pub fn failed(&self) -> bool {
        matches!(self.drop, Some(IndexDrop::Failed(_))) || matches!(self.create, IndexCreate::Failed(_))
    }
}

/// Drops every old index and creates its replacement. Nothing here aborts
/// the run.
pub async fn rebuild_indexes<S>(store: &S, specs: &[IndexSpec], mode: RunMode) -> Vec<IndexOutcome>
where
    S: MigrationStore + ?Sized,
{
    let mut outcomes = Vec::with_capacity(specs.len());
    for spec in specs {
        let old_name = spec.old_name();
        let new_name = spec.new_name();

        if !mode.is_live() {
            info!(collection = spec.collection, drop = %old_name, create = %new_name, "Would replace index");
            outcomes.push(IndexOutcome {
                collection: spec.collection.to_string(),
                old_name,
                new_name,
                drop: None,
                create: IndexCreate::Planned,
            });
            continue;
        }

        let drop = store.drop_index(spec.collection, &old_name).await;
        match &drop {
            IndexDrop::Dropped => info!(collection = spec.collection, index = %old_name, "Dropped index"),
            IndexDrop::NotFound => info!(collection = spec.collection, index = %old_name, "Index not present, nothing to drop"),
            IndexDrop::Failed(reason) => warn!(collection = spec.collection, index = %old_name, reason = %reason, "Index drop failed"),
        }

        let create = match store.create_index(spec.collection, spec.new_keys(), &new_name).await {
            Ok(()) => {
                info!(collection = spec.collection, index = %new_name, "Created index");
                IndexCreate::Created
            }
            Err(e) => {
                warn!(collection = spec.collection, index = %new_name, error = %e, "Index creation failed");
                IndexCreate::Failed(e.to_string())
            }
        };

        outcomes.push(IndexOutcome {
            collection: spec.collection.to_string(),
            old_name,
            new_name,
            drop: Some(drop),
            create,
        });
    }
    outcomes
}
