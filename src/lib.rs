//! The Small Back Office - client core
//!
//! Screen-facing state and operations of the restaurant back office:
//! session, catalogs, per-branch inventory, supplier orders and onboarding.
//! Screens call the JSON command handlers in [`commands`]; every handler
//! receives the one [`AppState`] built at start-up.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;

pub mod api;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod inventory;
pub mod models;
pub mod notice;
pub mod onboarding;
pub mod orders;
pub mod preferences;
pub mod session;
pub mod storage;

use api::ApiClient;
use catalog::CatalogView;
use config::ClientConfig;
use db::DbState;
use error::{AppError, AppResult};
use inventory::InventoryScreen;
use models::{Category, FoodItem, Product};
use orders::{OrderBoard, ReceiptCart};
use preferences::Preferences;
use session::Session;
use storage::{CredentialStore, KeyringStore};

// ============================================================================
// Payload helpers
// ============================================================================

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Accepts JSON numbers and numeric strings.
pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Number(n)) => {
                if let Some(n) = n.as_i64() {
                    return Some(n);
                }
            }
            Some(serde_json::Value::String(s)) => {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Some(n);
                }
            }
            _ => {}
        }
    }
    None
}

// ============================================================================
// Application state
// ============================================================================

/// Everything the screens share. Built once and passed to every command.
pub struct AppState {
    pub config: ClientConfig,
    pub db: Arc<DbState>,
    pub session: RwLock<Session>,
    pub preferences: Preferences,
    api: ApiClient,
    pub inventory: Mutex<InventoryScreen>,
    pub orders: Mutex<OrderBoard>,
    pub cart: Mutex<ReceiptCart>,
    pub products: Mutex<CatalogView<Product>>,
    pub food_items: Mutex<CatalogView<FoodItem>>,
    pub categories: Mutex<Vec<Category>>,
    screen_token: std::sync::Mutex<CancellationToken>,
}

impl AppState {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        db: Arc<DbState>,
    ) -> AppResult<Self> {
        let api = ApiClient::new(&config)?;
        let session = Session::load(store);
        Ok(Self {
            preferences: Preferences::new(db.clone()),
            products: Mutex::new(CatalogView::new(config.page_size)),
            food_items: Mutex::new(CatalogView::new(config.page_size)),
            inventory: Mutex::new(InventoryScreen::new()),
            orders: Mutex::new(OrderBoard::default()),
            cart: Mutex::new(ReceiptCart::new()),
            categories: Mutex::new(Vec::new()),
            session: RwLock::new(session),
            screen_token: std::sync::Mutex::new(CancellationToken::new()),
            config,
            db,
            api,
        })
    }

    /// Open the settings database under `data_dir`, load configuration and
    /// seed the session from the OS credential store.
    pub fn bootstrap(data_dir: &Path) -> AppResult<Self> {
        let db = db::init(data_dir).map_err(AppError::Database)?;
        let config = {
            let conn = db.conn.lock().map_err(|e| AppError::Database(e.to_string()))?;
            ClientConfig::load(&conn)
        };
        info!(
            api_base_url = %config.api_base_url,
            db_path = %db.db_path.display(),
            "application state ready"
        );
        Self::new(config, Arc::new(KeyringStore::new()), Arc::new(db))
    }

    /// Unauthenticated base client.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Client carrying the current session token.
    pub async fn client(&self) -> ApiClient {
        self.session.read().await.client(&self.api)
    }

    /// Token of the current screen. Work started under it must not apply
    /// its results once the token is cancelled.
    pub fn screen_token(&self) -> CancellationToken {
        self.screen_token
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Cancel in-flight work of the current screen and start a fresh token.
    pub fn leave_screen(&self) {
        let mut guard = self
            .screen_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.cancel();
        *guard = CancellationToken::new();
    }

    /// Leave the current screen and drop everything it held: pending stock
    /// edits, the order board, the receipt cart and the catalog lists.
    /// Used when the signed-in user changes.
    pub async fn reset_screens(&self) {
        self.leave_screen();
        *self.inventory.lock().await = InventoryScreen::new();
        *self.orders.lock().await = OrderBoard::default();
        *self.cart.lock().await = ReceiptCart::new();
        *self.products.lock().await = CatalogView::new(self.config.page_size);
        *self.food_items.lock().await = CatalogView::new(self.config.page_size);
        self.categories.lock().await.clear();
        debug!("screen state cleared");
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Initialise logging and build the application state.
///
/// The returned guard flushes the log file on drop; keep it alive for the
/// life of the process.
pub fn run(data_dir: Option<&Path>) -> Result<(AppState, WorkerGuard), String> {
    let guard = diagnostics::init_logging(&diagnostics::LogOptions::default())?;
    info!("Starting The Small Back Office v{}", env!("CARGO_PKG_VERSION"));

    let default_dir = diagnostics::get_data_dir();
    let data_dir = data_dir.unwrap_or(&default_dir);
    let state = AppState::bootstrap(data_dir).map_err(|e| e.to_string())?;
    Ok((state, guard))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use storage::MemoryStore;

    pub fn state_for(base_url: &str) -> AppState {
        state_with_store(base_url, Arc::new(MemoryStore::new()))
    }

    pub fn state_with_store(base_url: &str, store: Arc<MemoryStore>) -> AppState {
        let config = ClientConfig {
            api_base_url: base_url.to_string(),
            ..ClientConfig::default()
        };
        let db = Arc::new(db::open_in_memory().expect("db"));
        AppState::new(config, store, db).expect("state")
    }

    /// Signed in as a manager of branch 7.
    pub fn signed_in_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.set(storage::KEY_AUTH_TOKEN, "tok").expect("set");
        store.set(storage::KEY_USER_ID, "5").expect("set");
        store.set(storage::KEY_USERNAME, "sam").expect("set");
        store.set(storage::KEY_ROLE, "manager").expect("set");
        store.set(storage::KEY_ORG_ID, "3").expect("set");
        store.set(storage::KEY_BRANCH_ID, "7").expect("set");
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_helpers_read_first_usable_key() {
        let v = serde_json::json!({"a": "  ", "b": " x ", "id": "42", "n": 7});
        assert_eq!(value_str(&v, &["a", "b"]), Some("x".into()));
        assert_eq!(value_i64(&v, &["missing", "id"]), Some(42));
        assert_eq!(value_i64(&v, &["n"]), Some(7));
        assert_eq!(value_i64(&v, &["b"]), None);
    }

    #[test]
    fn leaving_a_screen_cancels_its_token() {
        let state = test_support::state_for("http://localhost:1");
        let first = state.screen_token();
        state.leave_screen();
        assert!(first.is_cancelled());
        assert!(!state.screen_token().is_cancelled());
    }

    #[test]
    fn state_seeds_session_from_store() {
        let state =
            test_support::state_with_store("http://localhost:1", test_support::signed_in_store());
        let session = state.session.try_read().expect("read");
        assert_eq!(session.active_branch(), Ok(7));
    }
}
