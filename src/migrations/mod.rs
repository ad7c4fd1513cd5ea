//! Tenant → owner data migration.
//!
//! Documents in the data collections move from `tenantId` addressing to
//! `ownerId` addressing; users simply lose their `tenantId`. See
//! [`runner::run_migration`] for the phase order.

pub mod backup;
pub mod indexes;
pub mod mapping;
pub mod report;
pub mod runner;

use crate::error::MigrationError;

/// Collections that gain an `ownerId`, in processing order.
pub const DATA_COLLECTIONS: &[&str] = &["patients", "bookings", "staff", "treatments", "withdrawals"];

pub const USERS: &str = "users";

/// Every collection touched by the migration, in backup order.
pub const ALL_COLLECTIONS: &[&str] = &[
    "patients",
    "bookings",
    "staff",
    "treatments",
    "withdrawals",
    USERS,
];

pub const TENANT_FIELD: &str = "tenantId";
pub const OWNER_FIELD: &str = "ownerId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    DryRun,
    Live,
}

impl RunMode {
    /// Live mutation needs an explicit `--force`. With both flags the run
    /// stays a dry run.
    pub fn from_flags(dry_run: bool, force: bool) -> Result<Self, MigrationError> {
        match (dry_run, force) {
            (true, _) => Ok(RunMode::DryRun),
            (false, true) => Ok(RunMode::Live),
            (false, false) => Err(MigrationError::SafetyGate),
        }
    }

    pub fn is_live(self) -> bool {
        self == RunMode::Live
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::DryRun => write!(f, "dry-run"),
            RunMode::Live => write!(f, "live"),
        }
    }
}
