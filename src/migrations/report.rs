//! Per-document outcomes and the summaries folded from them.

use std::fmt;

use mongodb::bson::Bson;
use tracing::{info, warn};

use super::backup::BackupSnapshot;
use super::indexes::IndexOutcome;
use super::RunMode;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Updated,
    WouldUpdate,
    Unmapped { tenant: String },
    WriteFailed { reason: String },
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Unmapped { .. } | Outcome::WriteFailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOutcome {
    pub id: Bson,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub examined: u64,
    pub updated: u64,
    pub errors: u64,
}

impl Tally {
    fn record(self, outcome: &Outcome) -> Self {
        Self {
            examined: self.examined + 1,
            updated: self.updated + u64::from(!outcome.is_error()),
            errors: self.errors + u64::from(outcome.is_error()),
        }
    }
}

impl std::ops::Add for Tally {
    type Output = Tally;

    fn add(self, other: Tally) -> Tally {
        Tally {
            examined: self.examined + other.examined,
            updated: self.updated + other.updated,
            errors: self.errors + other.errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionReport {
    pub collection: String,
    pub outcomes: Vec<DocumentOutcome>,
    /// Set when the documents could not be selected at all.
    pub selection_error: Option<String>,
}

impl CollectionReport {
    pub fn new(collection: impl Into<String>, outcomes: Vec<DocumentOutcome>) -> Self {
        Self {
            collection: collection.into(),
            outcomes,
            selection_error: None,
        }
    }

    pub fn unreadable(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            outcomes: Vec::new(),
            selection_error: Some(reason.into()),
        }
    }

    pub fn tally(&self) -> Tally {
        let base = Tally {
            errors: u64::from(self.selection_error.is_some()),
            ..Tally::default()
        };
        self.outcomes
            .iter()
            .fold(base, |tally, o| tally.record(&o.outcome))
    }

    pub fn errors(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes.iter().filter(|o| o.outcome.is_error())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    TenantRemains { collection: String, count: u64 },
    UsersGainedOwner { count: u64 },
    OwnerShortfall { collection: String, expected: u64, found: u64 },
    CountFailed { collection: String, reason: String },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::TenantRemains { collection, count } => {
                write!(f, "{collection}: {count} document(s) still have tenantId")
            }
            ValidationWarning::UsersGainedOwner { count } => {
                write!(f, "users: {count} document(s) unexpectedly have ownerId")
            }
            ValidationWarning::OwnerShortfall {
                collection,
                expected,
                found,
            } => write!(
                f,
                "{collection}: expected at least {expected} document(s) with ownerId, found {found}"
            ),
            ValidationWarning::CountFailed { collection, reason } => {
                write!(f, "{collection}: validation count failed: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: RunMode,
    pub collections: Vec<CollectionReport>,
    pub indexes: Vec<IndexOutcome>,
    pub warnings: Vec<ValidationWarning>,
    pub backups: Vec<BackupSnapshot>,
    pub recorded: bool,
}

impl RunSummary {
    pub fn totals(&self) -> Tally {
        self.collections
            .iter()
            .map(CollectionReport::tally)
            .fold(Tally::default(), |acc, t| acc + t)
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.collection == name)
    }

    pub fn index_failures(&self) -> usize {
        self.indexes.iter().filter(|o| o.failed()).count()
    }

    pub fn log(&self) {
        let totals = self.totals();
        let verb = if self.mode.is_live() { "updated" } else { "would update" };

        info!("========== Migration summary ({}) ==========", self.mode);
        info!(run_id = %self.run_id, "Run");
        for report in &self.collections {
            let t = report.tally();
            info!(
                collection = %report.collection,
                examined = t.examined,
                updated = t.updated,
                errors = t.errors,
                "  {}: {} {}, {} error(s)",
                report.collection,
                verb,
                t.updated,
                t.errors
            );
        }
        info!(
            collections = self.collections.len(),
            examined = totals.examined,
            updated = totals.updated,
            errors = totals.errors,
            "Total: {} document(s) {}, {} error(s)",
            totals.updated,
            verb,
            totals.errors
        );
        for report in &self.collections {
            if let Some(reason) = &report.selection_error {
                warn!(collection = %report.collection, "Not migrated: {}", reason);
            }
            for skipped in report.errors() {
                warn!(collection = %report.collection, id = %skipped.id, "Skipped: {:?}", skipped.outcome);
            }
        }
        if self.index_failures() > 0 {
            warn!(failures = self.index_failures(), "Some index operations failed");
        }
        for warning in &self.warnings {
            warn!("Validation: {}", warning);
        }
        for backup in &self.backups {
            info!(
                collection = %backup.collection,
                documents = backup.document_count,
                "Backup: {}",
                backup.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, outcome: Outcome) -> DocumentOutcome {
        DocumentOutcome {
            id: Bson::String(id.to_string()),
            outcome,
        }
    }

    #[test]
    fn test_tally_folds_outcomes() {
        let report = CollectionReport::new(
            "patients",
            vec![
                outcome("a", Outcome::Updated),
                outcome("b", Outcome::Updated),
                outcome(
                    "c",
                    Outcome::Unmapped {
                        tenant: "unknown-tenant".into(),
                    },
                ),
            ],
        );
        assert_eq!(
            report.tally(),
            Tally {
                examined: 3,
                updated: 2,
                errors: 1
            }
        );
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_unreadable_collection_counts_one_error() {
        let report = CollectionReport::unreadable("staff", "connection reset");
        assert_eq!(
            report.tally(),
            Tally {
                examined: 0,
                updated: 0,
                errors: 1
            }
        );
    }

    #[test]
    fn test_summary_totals_across_collections() {
        let summary = RunSummary {
            run_id: "run".into(),
            mode: RunMode::DryRun,
            collections: vec![
                CollectionReport::new("patients", vec![outcome("a", Outcome::WouldUpdate)]),
                CollectionReport::new(
                    "bookings",
                    vec![
                        outcome("b", Outcome::WouldUpdate),
                        outcome(
                            "c",
                            Outcome::WriteFailed {
                                reason: "timeout".into(),
                            },
                        ),
                    ],
                ),
            ],
            indexes: Vec::new(),
            warnings: Vec::new(),
            backups: Vec::new(),
            recorded: false,
        };
        assert_eq!(
            summary.totals(),
            Tally {
                examined: 3,
                updated: 2,
                errors: 1
            }
        );
        assert_eq!(summary.collection("bookings").unwrap().tally().errors, 1);
    }

    #[test]
    fn test_warning_display() {
        let warning = ValidationWarning::TenantRemains {
            collection: "patients".into(),
            count: 1,
        };
        assert_eq!(warning.to_string(), "patients: 1 document(s) still have tenantId");
    }
}
