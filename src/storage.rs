//! Profile persistence over a pooled SQL connection.
//!
//! Wraps one pooled connection source to either an embedded file database or
//! a networked server database, chosen by the configured driver identifier.
//! Handles schema creation, profile lookup by name or UUID, and the
//! insert-or-update save logic the login pipeline relies on.
//!
//! The store performs no internal threading and holds no locks: every
//! operation checks one connection out of the pool for its duration, and
//! correctness of concurrent first-time saves rests on the table's
//! uniqueness constraints.

use std::path::Path;
use std::sync::Once;

use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::profile::Profile;

/// Upper bound on concurrently open connections per store.
const MAX_POOL_CONNECTIONS: u32 = 8;

const LOAD_BY_NAME: &str =
    "SELECT id, uuid, name, premium, last_ip, last_login FROM profiles WHERE name = ? LIMIT 1";

const LOAD_BY_UUID: &str =
    "SELECT id, uuid, name, premium, last_ip, last_login FROM profiles WHERE uuid = ? LIMIT 1";

const INSERT_PROFILE: &str =
    "INSERT INTO profiles (uuid, name, premium, last_ip) VALUES (?, ?, ?, ?)";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    /// The pool could not be built (bad parameters, unreachable host).
    Setup(sqlx::Error),
    /// Table creation failed.
    Schema(sqlx::Error),
    /// A lookup failed; distinct from "not found".
    Query(sqlx::Error),
    /// A save failed (constraint violation, connection loss).
    Save(sqlx::Error),
    /// A stored uuid column held something other than 32-char hex.
    InvalidUuid(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Setup(e) => write!(f, "connection setup error: {e}"),
            StorageError::Schema(e) => write!(f, "schema error: {e}"),
            StorageError::Query(e) => write!(f, "query error: {e}"),
            StorageError::Save(e) => write!(f, "save error: {e}"),
            StorageError::InvalidUuid(raw) => write!(f, "invalid stored uuid: {raw:?}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Setup(e)
            | StorageError::Schema(e)
            | StorageError::Query(e)
            | StorageError::Save(e) => Some(e),
            StorageError::InvalidUuid(_) => None,
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Query(e)
    }
}

impl StorageError {
    /// True when the underlying failure was a uniqueness-constraint
    /// violation, e.g. the losing side of two concurrent first-time saves
    /// for the same identity. Callers can treat these as "already stored"
    /// rather than retrying.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StorageError::Setup(e)
            | StorageError::Schema(e)
            | StorageError::Query(e)
            | StorageError::Save(e) => is_unique_violation(e),
            StorageError::InvalidUuid(_) => false,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ---------------------------------------------------------------------------
// SQL dialect selection
// ---------------------------------------------------------------------------

/// The two statement dialects the store can speak, resolved once from the
/// driver identifier when the pool is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// Embedded file engine.
    Sqlite,
    /// Networked server engine.
    MySql,
}

impl SqlDialect {
    pub fn from_driver(driver: &str) -> Self {
        if driver.contains("sqlite") {
            SqlDialect::Sqlite
        } else {
            SqlDialect::MySql
        }
    }

    fn auto_increment(self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "AUTOINCREMENT",
            SqlDialect::MySql => "AUTO_INCREMENT",
        }
    }

    /// Engine-side expression for the current time in epoch milliseconds.
    /// Login times are assigned by the database, never by the caller.
    fn now_millis(self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "(CAST(strftime('%s','now') AS INTEGER) * 1000)",
            SqlDialect::MySql => "(UNIX_TIMESTAMP() * 1000)",
        }
    }
}

/// Dialect-dependent statement texts, built once at connect time.
#[derive(Debug)]
struct Statements {
    create_table: String,
    reclaim: String,
    update_by_id: String,
}

impl Statements {
    fn new(dialect: SqlDialect) -> Self {
        let now = dialect.now_millis();
        Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS profiles (\
                 id INTEGER PRIMARY KEY {}, \
                 uuid CHAR(32), \
                 name VARCHAR(16) NOT NULL, \
                 premium BOOLEAN NOT NULL, \
                 last_ip VARCHAR(255) NOT NULL, \
                 last_login BIGINT NOT NULL DEFAULT {now}, \
                 UNIQUE (uuid), \
                 UNIQUE (name))",
                dialect.auto_increment(),
            ),
            reclaim: format!(
                "UPDATE profiles SET name = ?, last_ip = ?, last_login = {now} \
                 WHERE uuid = ? AND premium = 1",
            ),
            update_by_id: format!(
                "UPDATE profiles SET uuid = ?, name = ?, premium = ?, last_ip = ?, \
                 last_login = {now} WHERE id = ?",
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Profile store
// ---------------------------------------------------------------------------

/// Main store handle wrapping the pooled connection source.
///
/// Cheap to share by reference between connection handlers; the pool itself
/// supports concurrent acquire/release.
pub struct ProfileStore {
    pool: AnyPool,
    dialect: SqlDialect,
    sql: Statements,
}

static INSTALL_DRIVERS: Once = Once::new();

impl ProfileStore {
    /// Build the pooled connection source from the given parameters.
    ///
    /// `config.database` may contain [`DATA_DIR_TOKEN`]; it is substituted
    /// with `data_dir` before the connection URL is formed. Errors are not
    /// retried here: a failed pool build means the caller decides whether to
    /// abort startup.
    ///
    /// [`DATA_DIR_TOKEN`]: crate::config::DATA_DIR_TOKEN
    pub async fn connect(config: &StorageConfig, data_dir: &Path) -> Result<Self, StorageError> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let dialect = SqlDialect::from_driver(&config.driver);
        let database = config.resolve_database(data_dir);

        let pool = match dialect {
            // The embedded engine gets a liveness check on every checkout;
            // the networked engine relies on pool defaults.
            SqlDialect::Sqlite => {
                AnyPoolOptions::new()
                    .max_connections(MAX_POOL_CONNECTIONS)
                    .test_before_acquire(true)
                    .connect(&format!("sqlite://{database}?mode=rwc"))
                    .await
            }
            SqlDialect::MySql => {
                AnyPoolOptions::new()
                    .max_connections(MAX_POOL_CONNECTIONS)
                    .connect(&format!(
                        "mysql://{}:{}@{}:{}/{}",
                        config.user, config.password, config.host, config.port, database
                    ))
                    .await
            }
        }
        .map_err(StorageError::Setup)?;

        Ok(Self {
            pool,
            dialect,
            sql: Statements::new(dialect),
        })
    }

    /// Create the profile table if it does not exist yet. Safe to call on
    /// every startup.
    pub async fn create_tables(&self) -> Result<(), StorageError> {
        sqlx::query(&self.sql.create_table)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Schema)?;
        Ok(())
    }

    /// Look up a profile by login name.
    ///
    /// An unknown name is not an error: it returns a fresh cracked profile
    /// for that name, the "never seen, default to unauthenticated" verdict.
    /// A data-access failure is logged and returned as
    /// [`StorageError::Query`], distinct from the not-found outcome.
    pub async fn load_profile(&self, name: &str) -> Result<Profile, StorageError> {
        match self.fetch_by_name(name).await {
            Ok(Some(profile)) => Ok(profile),
            Ok(None) => Ok(Profile::cracked(name)),
            Err(err) => {
                tracing::error!(name, error = %err, "failed to load profile by name");
                Err(err)
            }
        }
    }

    /// Look up a profile by provider UUID.
    ///
    /// Unlike the name lookup, an unknown UUID yields `Ok(None)`: there is
    /// no useful default to synthesize once premium status is already
    /// suspected.
    pub async fn load_profile_by_uuid(
        &self,
        uuid: Uuid,
    ) -> Result<Option<Profile>, StorageError> {
        let hex = uuid.simple().to_string();
        match self.fetch_by_uuid(&hex).await {
            Ok(found) => Ok(found),
            Err(err) => {
                tracing::error!(uuid = %hex, error = %err, "failed to load profile by uuid");
                Err(err)
            }
        }
    }

    /// Persist a profile and return the stored shape.
    ///
    /// For a profile without an id this inserts a new row, except when its
    /// UUID already owns a premium row, in which case that row is updated in
    /// place (a premium player changed their display name). For a profile
    /// with an id this is a plain update keyed by the id.
    ///
    /// The returned profile carries the generated id after an insert; the
    /// caller must keep it, or the next save for this identity re-runs the
    /// insert branch and is rejected by the uniqueness constraints.
    pub async fn save(&self, profile: &Profile) -> Result<Profile, StorageError> {
        let result = match profile.user_id {
            Some(id) => self.update_existing(profile, id).await,
            None => self.save_new(profile).await,
        };
        result.map_err(|err| {
            if is_unique_violation(&err) {
                tracing::error!(
                    name = %profile.name, error = %err,
                    "profile save rejected by a uniqueness constraint"
                );
            } else {
                tracing::error!(name = %profile.name, error = %err, "failed to save profile");
            }
            StorageError::Save(err)
        })
    }

    /// Which statement dialect this store was provisioned with.
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// The underlying pool, for host-side composition.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Release the pooled connection source. Calling twice is harmless.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn fetch_by_name(&self, name: &str) -> Result<Option<Profile>, StorageError> {
        let row = sqlx::query(LOAD_BY_NAME)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Query)?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn fetch_by_uuid(&self, hex: &str) -> Result<Option<Profile>, StorageError> {
        let row = sqlx::query(LOAD_BY_UUID)
            .bind(hex)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Query)?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn save_new(&self, profile: &Profile) -> Result<Profile, sqlx::Error> {
        let uuid_hex = profile.uuid.map(|u| u.simple().to_string());

        // A premium row may already exist under this UUID with an outdated
        // name. Update it in place; inserting instead would either duplicate
        // the identity or trip the name uniqueness constraint.
        if let Some(hex) = &uuid_hex {
            let reclaimed = sqlx::query(&self.sql.reclaim)
                .bind(profile.name.as_str())
                .bind(profile.last_ip.as_str())
                .bind(hex.as_str())
                .execute(&self.pool)
                .await?;
            if reclaimed.rows_affected() > 0 {
                return Ok(profile.clone());
            }
        }

        // A missing uuid is stored as SQL NULL, keeping "cracked identity
        // with no known UUID" distinct from any real value.
        let inserted = sqlx::query(INSERT_PROFILE)
            .bind(uuid_hex)
            .bind(profile.name.as_str())
            .bind(profile.premium as i32)
            .bind(profile.last_ip.as_str())
            .execute(&self.pool)
            .await?;

        let mut saved = profile.clone();
        if let Some(id) = inserted.last_insert_id() {
            saved.user_id = Some(id);
        }
        Ok(saved)
    }

    async fn update_existing(&self, profile: &Profile, id: i64) -> Result<Profile, sqlx::Error> {
        let uuid_hex = profile.uuid.map(|u| u.simple().to_string());
        sqlx::query(&self.sql.update_by_id)
            .bind(uuid_hex)
            .bind(profile.name.as_str())
            .bind(profile.premium as i32)
            .bind(profile.last_ip.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(profile.clone())
    }
}

fn profile_from_row(row: &AnyRow) -> Result<Profile, StorageError> {
    let stored_uuid: Option<String> = row.try_get("uuid")?;
    let uuid = match stored_uuid {
        Some(hex) => {
            Some(Uuid::parse_str(&hex).map_err(|_| StorageError::InvalidUuid(hex.clone()))?)
        }
        None => None,
    };

    Ok(Profile {
        user_id: Some(row.try_get::<i64, _>("id")?),
        uuid,
        name: row.try_get("name")?,
        premium: row.try_get::<i64, _>("premium")? != 0,
        last_ip: row.try_get("last_ip")?,
        last_login: Some(row.try_get::<i64, _>("last_login")?),
    })
}
