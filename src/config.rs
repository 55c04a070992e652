//! Client configuration.
//!
//! Stored as a JSON document in the `local_settings` table
//! (category `client`, key `config`) and overridden by environment variables
//! at load time. Missing fields fall back to [`ClientConfig::default`].

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::db;

const SETTINGS_CATEGORY: &str = "client";
const SETTINGS_KEY: &str = "config";

const ENV_API_URL: &str = "BACKOFFICE_API_URL";
const ENV_RECONCILE_CONCURRENCY: &str = "BACKOFFICE_RECONCILE_CONCURRENCY";
const ENV_REQUEST_TIMEOUT: &str = "BACKOFFICE_REQUEST_TIMEOUT_SECS";

/// Path templates for every REST resource the client touches. Placeholders
/// are `{branchId}`, `{productId}`, `{orderId}` and `{userId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Endpoints {
    pub login: String,
    pub user: String,
    pub inventory_item: String,
    pub inventory_collection: String,
    pub inventory_by_branch: String,
    pub orders_by_branch: String,
    pub order: String,
    pub orders: String,
    pub products: String,
    pub food_items: String,
    pub categories: String,
    pub organisations: String,
    pub branches: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".into(),
            user: "/users/{userId}".into(),
            inventory_item: "/inventory/branch/{branchId}/product/{productId}".into(),
            inventory_collection: "/inventory".into(),
            inventory_by_branch: "/inventory/branch/{branchId}".into(),
            orders_by_branch: "/orders/branch/{branchId}".into(),
            order: "/orders/{orderId}".into(),
            orders: "/orders".into(),
            products: "/products".into(),
            food_items: "/food-items".into(),
            categories: "/categories".into(),
            organisations: "/organisations".into(),
            branches: "/branches".into(),
        }
    }
}

/// Substitute `{name}` placeholders in a path template.
pub fn render_path(template: &str, params: &[(&str, i64)]) -> String {
    params.iter().fold(template.to_string(), |path, (name, value)| {
        path.replace(&format!("{{{name}}}"), &value.to_string())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Upper bound on in-flight inventory upserts. 1 means strictly sequential.
    pub reconcile_concurrency: usize,
    pub page_size: usize,
    pub success_notice_secs: u64,
    pub error_notice_secs: u64,
    pub banner_notice_secs: u64,
    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".into(),
            request_timeout_secs: 30,
            reconcile_concurrency: 4,
            page_size: 12,
            success_notice_secs: 3,
            error_notice_secs: 6,
            banner_notice_secs: 10,
            endpoints: Endpoints::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Load the stored configuration and apply environment overrides.
    pub fn load(conn: &Connection) -> Self {
        let mut config = Self::load_stored(conn);
        config.apply_env_overrides();
        config.normalize();
        info!(
            api_base_url = %config.api_base_url,
            reconcile_concurrency = config.reconcile_concurrency,
            "client config loaded"
        );
        config
    }

    /// The configuration as stored, without environment overrides. This is
    /// the base for edits so an override never gets persisted.
    pub fn load_stored(conn: &Connection) -> Self {
        let mut config = match db::get_setting(conn, SETTINGS_CATEGORY, SETTINGS_KEY) {
            Some(raw) => match serde_json::from_str::<ClientConfig>(&raw) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "stored client config is invalid, using defaults");
                    ClientConfig::default()
                }
            },
            None => ClientConfig::default(),
        };
        config.normalize();
        config
    }

    /// Persist the configuration. Environment overrides are re-read on every
    /// load and do not belong here.
    pub fn save(&self, conn: &Connection) -> Result<(), String> {
        let raw = serde_json::to_string(self).map_err(|e| format!("serialize config: {e}"))?;
        db::set_setting(conn, SETTINGS_CATEGORY, SETTINGS_KEY, &raw)
    }

    /// Overlay the top-level fields present in `patch` and normalise.
    pub fn with_patch(&self, patch: &serde_json::Value) -> Result<Self, String> {
        let mut merged = serde_json::to_value(self).map_err(|e| format!("serialize config: {e}"))?;
        if let (Some(target), Some(fields)) = (merged.as_object_mut(), patch.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        let mut config: ClientConfig =
            serde_json::from_value(merged).map_err(|e| format!("invalid config: {e}"))?;
        config.normalize();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(raw) = std::env::var(ENV_RECONCILE_CONCURRENCY) {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.reconcile_concurrency = n,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_RECONCILE_CONCURRENCY}"),
            }
        }
        if let Ok(raw) = std::env::var(ENV_REQUEST_TIMEOUT) {
            match raw.trim().parse::<u64>() {
                Ok(n) => self.request_timeout_secs = n,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_REQUEST_TIMEOUT}"),
            }
        }
    }

    fn normalize(&mut self) {
        self.api_base_url = crate::api::normalize_base_url(&self.api_base_url);
        self.reconcile_concurrency = self.reconcile_concurrency.clamp(1, 32);
        if self.page_size == 0 {
            self.page_size = ClientConfig::default().page_size;
        }
    }
}
