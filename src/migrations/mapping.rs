//! Tenant → owner resolution.

use std::collections::BTreeMap;

use mongodb::bson::{Bson, Document};
use tracing::{debug, info, warn};

use super::TENANT_FIELD;

/// Roles whose holder owns a tenant's data.
pub const ADMIN_ROLES: &[&str] = &["admin", "owner", "super_admin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerSource {
    Discovered,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerEntry {
    pub owner: String,
    pub source: OwnerSource,
}

#[derive(Debug, Clone, Default)]
pub struct OwnerMapping {
    entries: BTreeMap<String, OwnerEntry>,
}

fn is_admin(user: &Document) -> bool {
    user.get_str("role")
        .map(|role| ADMIN_ROLES.iter().any(|r| r.eq_ignore_ascii_case(role)))
        .unwrap_or(false)
}

/// The user's `_id` as an owner identifier.
pub fn owner_id_of(user: &Document) -> Option<String> {
    match user.get("_id")? {
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// First admin-equivalent user per tenant, in scan order.
pub fn discover_owners(users: &[Document]) -> BTreeMap<String, String> {
    let mut discovered = BTreeMap::new();
    for user in users.iter().filter(|u| is_admin(u)) {
        let Ok(tenant) = user.get_str(TENANT_FIELD) else {
            continue;
        };
        let Some(owner) = owner_id_of(user) else {
            debug!(tenant, "Admin user without a usable _id skipped");
            continue;
        };
        discovered.entry(tenant.to_string()).or_insert(owner);
    }
    discovered
}

impl OwnerMapping {
    /// Merges owners discovered in `users` over the default table.
    pub fn build(users: &[Document], defaults: &BTreeMap<String, String>) -> Self {
        let mut entries: BTreeMap<String, OwnerEntry> = defaults
            .iter()
            .map(|(tenant, owner)| {
                (
                    tenant.clone(),
                    OwnerEntry {
                        owner: owner.clone(),
                        source: OwnerSource::Default,
                    },
                )
            })
            .collect();
        for (tenant, owner) in discover_owners(users) {
            entries.insert(
                tenant,
                OwnerEntry {
                    owner,
                    source: OwnerSource::Discovered,
                },
            );
        }
        Self { entries }
    }

    pub fn resolve(&self, tenant: &str) -> Option<&str> {
        self.entries.get(tenant).map(|e| e.owner.as_str())
    }

    pub fn entry(&self, tenant: &str) -> Option<&OwnerEntry> {
        self.entries.get(tenant)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn log_table(&self) {
        if self.is_empty() {
            warn!("Owner mapping is empty; every tenant-keyed document will be skipped");
            return;
        }
        info!(entries = self.len(), "Owner mapping built");
        for (tenant, entry) in &self.entries {
            info!(tenant = %tenant, owner = %entry.owner, source = ?entry.source, "  mapping");
        }
    }
}
