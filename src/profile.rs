//! The stored login-profile entity.
//!
//! A [`Profile`] records what the server knows about one player identity:
//! whether the identity authenticated against the external provider
//! ("premium") or is an offline-mode ("cracked") account, plus the last
//! observed network address and login time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One player identity as loaded from, or destined for, the profile table.
///
/// A profile is a plain value: the store holds no reference to it after a
/// load, and [`save`](crate::storage::ProfileStore::save) returns an updated
/// copy rather than mutating the caller's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Surrogate primary key. `None` until the first successful save.
    pub user_id: Option<i64>,
    /// Provider-assigned identifier. Present only for identities that were
    /// resolved against the premium identity provider; stored in the table
    /// as 32-char no-hyphen hex.
    pub uuid: Option<Uuid>,
    /// Display/login name at the time of the last save. At most 16 chars,
    /// case-sensitive.
    pub name: String,
    pub premium: bool,
    pub last_ip: String,
    /// Last login time in epoch milliseconds, assigned by the database at
    /// write time. `None` until the profile has been loaded from a stored
    /// row.
    pub last_login: Option<i64>,
}

impl Profile {
    /// A fresh offline-mode placeholder for a name that has never been seen:
    /// no id, no UUID, not premium, empty last address.
    pub fn cracked(name: &str) -> Self {
        Self {
            user_id: None,
            uuid: None,
            name: name.to_string(),
            premium: false,
            last_ip: String::new(),
            last_login: None,
        }
    }

    /// A not-yet-persisted profile for an identity the premium provider just
    /// resolved.
    pub fn premium(uuid: Uuid, name: &str, last_ip: &str) -> Self {
        Self {
            user_id: None,
            uuid: Some(uuid),
            name: name.to_string(),
            premium: true,
            last_ip: last_ip.to_string(),
            last_login: None,
        }
    }

    /// Whether this profile has been written to the table at least once.
    pub fn is_persisted(&self) -> bool {
        self.user_id.is_some()
    }
}
