//! Environment-driven settings for a migration run.
//!
//! `.env` is loaded by `main` through dotenvy; everything here reads through a
//! lookup function so tests never touch the process environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_DATABASE: &str = "beauty-clinic";
pub const DEFAULT_BACKUP_DIR: &str = "backups";
pub const DEFAULT_OWNER_MAP_FILE: &str = "config/tenant-owners.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("cannot read owner map {path}: {source}")]
    OwnerMapRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("owner map {path} is not a JSON object of strings: {source}")]
    OwnerMapParse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Connection and output settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub database: String,
    pub max_pool_size: u32,
    pub connect_timeout_ms: u64,
    pub backup_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mongodb_uri = lookup("MONGODB_URI")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("MONGODB_URI"))?;
        let database = lookup("MONGODB_DB")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        let max_pool_size = parse_or("MONGODB_MAX_POOL_SIZE", lookup("MONGODB_MAX_POOL_SIZE"), 4)?;
        let connect_timeout_ms = parse_or(
            "MONGODB_CONNECT_TIMEOUT_MS",
            lookup("MONGODB_CONNECT_TIMEOUT_MS"),
            10_000,
        )?;
        let backup_dir = lookup("BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));

        Ok(Self {
            mongodb_uri,
            database,
            max_pool_size,
            connect_timeout_ms,
            backup_dir,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Loads the fallback tenant → owner table.
///
/// An explicit path must exist. Without one, the conventional
/// `config/tenant-owners.json` is used when present, otherwise the table is
/// empty and only owners discovered in `users` resolve.
pub fn load_default_owners(path: Option<&Path>) -> Result<BTreeMap<String, String>, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let conventional = PathBuf::from(DEFAULT_OWNER_MAP_FILE);
            if !conventional.exists() {
                tracing::warn!(
                    "No owner map given and {} not found; using an empty default table",
                    DEFAULT_OWNER_MAP_FILE
                );
                return Ok(BTreeMap::new());
            }
            conventional
        }
    };

    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::OwnerMapRead {
        path: path.clone(),
        source,
    })?;
    let table: BTreeMap<String, String> =
        serde_json::from_str(&raw).map_err(|source| ConfigError::OwnerMapParse {
            path: path.clone(),
            source,
        })?;
    tracing::info!(path = %path.display(), entries = table.len(), "Loaded default owner table");
    Ok(table)
}
