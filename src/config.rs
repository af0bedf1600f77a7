//! Connection parameters for the profile store.
//!
//! The surrounding application owns configuration loading; this module only
//! defines the already-parsed parameter set handed to
//! [`ProfileStore::connect`](crate::storage::ProfileStore::connect) and the
//! data-directory placeholder substitution applied to the database path.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Placeholder token callers may embed in [`StorageConfig::database`].
///
/// Replaced with the host's data directory before the connection URL is
/// built, so a config file can say `{dataDir}/profiles.db` without knowing
/// where the application is installed.
pub const DATA_DIR_TOKEN: &str = "{dataDir}";

/// Already-parsed connection parameters for one relational backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver identifier. Anything containing `sqlite` selects the embedded
    /// file engine; everything else the networked server engine.
    pub driver: String,
    pub host: String,
    pub port: u16,
    /// File path for the embedded engine (may contain [`DATA_DIR_TOKEN`]),
    /// database name for the networked engine.
    pub database: String,
    pub user: String,
    pub password: String,
}

impl StorageConfig {
    /// Parameters for an embedded database at the given file path.
    ///
    /// Host, port and credentials are unused by the embedded engine and are
    /// left empty.
    pub fn embedded(database: &str) -> Self {
        Self {
            driver: "sqlite".to_string(),
            host: String::new(),
            port: 0,
            database: database.to_string(),
            user: String::new(),
            password: String::new(),
        }
    }

    /// The database path with [`DATA_DIR_TOKEN`] replaced by `data_dir`.
    pub fn resolve_database(&self, data_dir: &Path) -> String {
        self.database
            .replace(DATA_DIR_TOKEN, &data_dir.display().to_string())
    }
}
