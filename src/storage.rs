//! Persisted session attributes.
//!
//! Session secrets (auth token, user id, username, role, organisation and
//! branch ids, display language) live in the OS credential store via the
//! `keyring` crate: DPAPI on Windows, Keychain on macOS, Secret Service on
//! Linux. [`MemoryStore`] provides the same contract without touching the OS,
//! for embedding in tests and headless tools.

use keyring::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

const SERVICE_NAME: &str = "the-small-backoffice";

pub const KEY_AUTH_TOKEN: &str = "auth_token";
pub const KEY_USER_ID: &str = "user_id";
pub const KEY_USERNAME: &str = "username";
pub const KEY_ROLE: &str = "role";
pub const KEY_ORG_ID: &str = "organisation_id";
pub const KEY_BRANCH_ID: &str = "branch_id";
pub const KEY_LANGUAGE: &str = "language";

/// Keys removed on logout. The display language survives.
pub const SESSION_KEYS: &[&str] = &[
    KEY_AUTH_TOKEN,
    KEY_USER_ID,
    KEY_USERNAME,
    KEY_ROLE,
    KEY_ORG_ID,
    KEY_BRANCH_ID,
];

/// Key-value store for session attributes.
pub trait CredentialStore: Send + Sync {
    /// Returns `None` when the entry does not exist or cannot be read.
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    /// Succeeds when the entry does not exist.
    fn delete(&self, key: &str) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        let entry = match Entry::new(&self.service, key) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => Some(pw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to read credential");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let entry = Entry::new(&self.service, key).map_err(|e| e.to_string())?;
        entry.set_password(value).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        let entry = Entry::new(&self.service, key).map_err(|e| e.to_string())?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.entries
            .lock()
            .map_err(|e| e.to_string())?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        self.entries.lock().map_err(|e| e.to_string())?.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// High-level helpers
// ---------------------------------------------------------------------------

/// Read an integer attribute; unparsable values are treated as absent.
pub fn get_i64(store: &dyn CredentialStore, key: &str) -> Option<i64> {
    let raw = store.get(key)?;
    match raw.trim().parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, "stored session attribute is not an integer, ignoring");
            None
        }
    }
}

/// Write or delete an optional attribute.
pub fn set_optional(store: &dyn CredentialStore, key: &str, value: Option<&str>) -> Result<(), String> {
    match value {
        Some(v) if !v.trim().is_empty() => store.set(key, v.trim()),
        _ => store.delete(key),
    }
}

/// Delete every session attribute (logout).
pub fn clear_session(store: &dyn CredentialStore) -> Result<(), String> {
    info!("clearing persisted session attributes");
    for key in SESSION_KEYS {
        store.delete(key)?;
    }
    Ok(())
}
