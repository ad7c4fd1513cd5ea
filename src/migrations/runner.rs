use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::backup::{self, BackupSnapshot};
use super::indexes::{self, IndexSpec, INDEX_SPECS};
use super::mapping::OwnerMapping;
use super::report::{CollectionReport, DocumentOutcome, Outcome, RunSummary, ValidationWarning};
use super::{RunMode, ALL_COLLECTIONS, DATA_COLLECTIONS, OWNER_FIELD, TENANT_FIELD, USERS};
use crate::error::MigrationError;
use crate::metrics::PhaseTimer;
use crate::store::{LockAcquire, LockRecord, MigrationStore, RunRecord, MIGRATION_NAME};

/// What a run does and where it writes its backups.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub mode: RunMode,
    pub backup_dir: PathBuf,
    pub default_owners: BTreeMap<String, String>,
    pub index_specs: &'static [IndexSpec],
}

impl MigrationPlan {
    pub fn new(mode: RunMode, backup_dir: PathBuf, default_owners: BTreeMap<String, String>) -> Self {
        Self {
            mode,
            backup_dir,
            default_owners,
            index_specs: INDEX_SPECS,
        }
    }
}

/// Runs the migration against an already connected store.
///
/// A live run holds the migration lock from before the backups until the
/// summary, and releases it whether or not the run succeeded.
pub async fn run_migration<S>(store: &S, plan: &MigrationPlan) -> Result<RunSummary, MigrationError>
where
    S: MigrationStore + ?Sized,
{
    let run_id = Uuid::new_v4().to_string();
    info!(run_id = %run_id, mode = %plan.mode, "Starting tenant to owner migration");

    if !plan.mode.is_live() {
        return migrate(store, plan, run_id).await;
    }

    let lock = LockRecord::new(run_id.clone());
    match store.acquire_lock(&lock).await.map_err(MigrationError::Lock)? {
        LockAcquire::Acquired => info!(holder = %lock.holder, "Migration lock acquired"),
        LockAcquire::Held { holder, since } => {
            return Err(MigrationError::LockHeld { holder, since });
        }
    }

    let result = migrate(store, plan, run_id).await;

    if let Err(e) = store.release_lock(&lock).await {
        warn!(error = %e, lock = MIGRATION_NAME, "Failed to release migration lock; remove it manually");
    } else {
        info!("Migration lock released");
    }
    result
}

async fn migrate<S>(store: &S, plan: &MigrationPlan, run_id: String) -> Result<RunSummary, MigrationError>
where
    S: MigrationStore + ?Sized,
{
    let mode = plan.mode;

    let backups = if mode.is_live() {
        let _timer = PhaseTimer::new("backup").with_threshold(120_000);
        info!(dir = %plan.backup_dir.display(), "Backing up collections");
        backup::snapshot_all(store, ALL_COLLECTIONS, &plan.backup_dir, Utc::now(), &run_id).await?
    } else {
        info!("Dry run: backups skipped");
        Vec::new()
    };

    let mapping = {
        let _timer = PhaseTimer::new("owner mapping");
        let users = store
            .find_all(USERS)
            .await
            .map_err(|source| MigrationError::Read {
                collection: USERS.to_string(),
                source,
            })?;
        OwnerMapping::build(&users, &plan.default_owners)
    };
    mapping.log_table();

    let mut collections = Vec::with_capacity(ALL_COLLECTIONS.len());
    for collection in DATA_COLLECTIONS {
        let _timer = PhaseTimer::new(format!("migrate {collection}"));
        collections.push(migrate_collection(store, collection, &mapping, mode).await);
    }
    {
        let _timer = PhaseTimer::new("migrate users");
        collections.push(migrate_users(store, mode).await);
    }

    let indexes = {
        let _timer = PhaseTimer::new("indexes");
        info!("Rebuilding indexes");
        indexes::rebuild_indexes(store, plan.index_specs, mode).await
    };

    let warnings = if mode.is_live() {
        let _timer = PhaseTimer::new("validation");
        validate(store, &collections, &backups).await
    } else {
        Vec::new()
    };

    let mut summary = RunSummary {
        run_id,
        mode,
        collections,
        indexes,
        warnings,
        backups,
        recorded: false,
    };

    if mode.is_live() {
        let totals = summary.totals();
        let record = RunRecord {
            name: MIGRATION_NAME,
            run_id: summary.run_id.clone(),
            applied_at: Utc::now(),
            updated: totals.updated,
            errors: totals.errors,
        };
        match store.record_run(&record).await {
            Ok(()) => summary.recorded = true,
            Err(e) => warn!(error = %e, "Failed to record migration run"),
        }
    }

    summary.log();
    Ok(summary)
}

/// Moves every tenant-keyed document in `collection` to its owner.
pub async fn migrate_collection<S>(
    store: &S,
    collection: &str,
    mapping: &OwnerMapping,
    mode: RunMode,
) -> CollectionReport
where
    S: MigrationStore + ?Sized,
{
    let docs = match store.find_with_field(collection, TENANT_FIELD).await {
        Ok(docs) => docs,
        Err(e) => {
            warn!(collection, error = %e, "Cannot select documents; collection skipped");
            return CollectionReport::unreadable(collection, e.to_string());
        }
    };
    info!(collection, documents = docs.len(), "Migrating collection");

    let mut outcomes = Vec::with_capacity(docs.len());
    for doc in docs {
        let id = doc.get("_id").cloned().unwrap_or_default();
        let Ok(tenant) = doc.get_str(TENANT_FIELD) else {
            warn!(collection, id = %id, "tenantId is not a string; skipped");
            outcomes.push(DocumentOutcome {
                id,
                outcome: Outcome::Unmapped {
                    tenant: doc.get(TENANT_FIELD).map(|v| v.to_string()).unwrap_or_default(),
                },
            });
            continue;
        };

        let Some(entry) = mapping.entry(tenant) else {
            warn!(collection, id = %id, tenant, "No owner for tenant; skipped");
            outcomes.push(DocumentOutcome {
                id,
                outcome: Outcome::Unmapped {
                    tenant: tenant.to_string(),
                },
            });
            continue;
        };

        let owner = entry.owner.as_str();
        let outcome = if !mode.is_live() {
            info!(collection, id = %id, tenant, owner, source = ?entry.source, "Would set ownerId and unset tenantId");
            Outcome::WouldUpdate
        } else {
            match store.reassign_owner(collection, &id, tenant, owner).await {
                Ok(true) => Outcome::Updated,
                Ok(false) => {
                    warn!(collection, id = %id, "Document changed before update; skipped");
                    Outcome::WriteFailed {
                        reason: "document no longer matches".to_string(),
                    }
                }
                Err(e) => {
                    warn!(collection, id = %id, error = %e, "Update failed");
                    Outcome::WriteFailed {
                        reason: e.to_string(),
                    }
                }
            }
        };
        outcomes.push(DocumentOutcome { id, outcome });
    }

    let report = CollectionReport::new(collection, outcomes);
    let tally = report.tally();
    info!(
        collection,
        examined = tally.examined,
        updated = tally.updated,
        errors = tally.errors,
        "Collection done"
    );
    report
}

/// Strips `tenantId` from users. Users never receive an `ownerId`.
pub async fn migrate_users<S>(store: &S, mode: RunMode) -> CollectionReport
where
    S: MigrationStore + ?Sized,
{
    let docs = match store.find_with_field(USERS, TENANT_FIELD).await {
        Ok(docs) => docs,
        Err(e) => {
            warn!(collection = USERS, error = %e, "Cannot select users; skipped");
            return CollectionReport::unreadable(USERS, e.to_string());
        }
    };
    info!(collection = USERS, documents = docs.len(), "Migrating users");

    let mut outcomes = Vec::with_capacity(docs.len());
    for doc in docs {
        let id = doc.get("_id").cloned().unwrap_or_default();
        let outcome = if !mode.is_live() {
            info!(collection = USERS, id = %id, "Would unset tenantId");
            Outcome::WouldUpdate
        } else {
            match store.strip_tenant(USERS, &id).await {
                Ok(true) => Outcome::Updated,
                Ok(false) => {
                    warn!(collection = USERS, id = %id, "User changed before update; skipped");
                    Outcome::WriteFailed {
                        reason: "document no longer matches".to_string(),
                    }
                }
                Err(e) => {
                    warn!(collection = USERS, id = %id, error = %e, "Update failed");
                    Outcome::WriteFailed {
                        reason: e.to_string(),
                    }
                }
            }
        };
        outcomes.push(DocumentOutcome { id, outcome });
    }
    CollectionReport::new(USERS, outcomes)
}

/// Post-migration counts. Discrepancies become warnings; nothing is repaired.
pub async fn validate<S>(
    store: &S,
    reports: &[CollectionReport],
    backups: &[BackupSnapshot],
) -> Vec<ValidationWarning>
where
    S: MigrationStore + ?Sized,
{
    let mut warnings = Vec::new();
    for collection in ALL_COLLECTIONS {
        let collection = *collection;
        let remaining = store.count_with_field(collection, TENANT_FIELD).await;
        let owned = store.count_with_field(collection, OWNER_FIELD).await;
        let (remaining, owned) = match (remaining, owned) {
            (Ok(r), Ok(o)) => (r, o),
            (Err(e), _) | (_, Err(e)) => {
                warnings.push(ValidationWarning::CountFailed {
                    collection: collection.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        info!(collection, remaining_tenant = remaining, with_owner = owned, "Validated");

        if remaining > 0 {
            warnings.push(ValidationWarning::TenantRemains {
                collection: collection.to_string(),
                count: remaining,
            });
        }

        if collection == USERS {
            if owned > 0 {
                warnings.push(ValidationWarning::UsersGainedOwner { count: owned });
            }
            continue;
        }

        let before = backups
            .iter()
            .find(|b| b.collection == collection)
            .map(|b| b.document_count as u64)
            .unwrap_or(0);
        let errors = reports
            .iter()
            .find(|r| r.collection == collection)
            .map(|r| r.tally().errors)
            .unwrap_or(0);
        let expected = before.saturating_sub(errors);
        if owned < expected {
            warnings.push(ValidationWarning::OwnerShortfall {
                collection: collection.to_string(),
                expected,
                found: owned,
            });
        }
    }

    if warnings.is_empty() {
        info!("Validation passed");
    }
    warnings
}
