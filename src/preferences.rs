//! Per-screen user preferences.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::db::{self, DbState};
use crate::error::{AppError, AppResult};

const VIEW_MODE_CATEGORY: &str = "view_mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Table,
    Card,
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::Table => write!(f, "table"),
            ViewMode::Card => write!(f, "card"),
        }
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(ViewMode::Table),
            "card" => Ok(ViewMode::Card),
            other => Err(format!("unknown view mode: {other}")),
        }
    }
}

/// Catalog screens that remember a view mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogScreen {
    Products,
    FoodItems,
}

impl CatalogScreen {
    pub fn key(&self) -> &'static str {
        match self {
            CatalogScreen::Products => "products",
            CatalogScreen::FoodItems => "food_items",
        }
    }
}

impl FromStr for CatalogScreen {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "products" => Ok(CatalogScreen::Products),
            "food_items" => Ok(CatalogScreen::FoodItems),
            other => Err(format!("unknown catalog screen: {other}")),
        }
    }
}

/// Typed get/set over the local settings table.
#[derive(Clone)]
pub struct Preferences {
    db: Arc<DbState>,
}

impl Preferences {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Missing or unrecognised values read as [`ViewMode::Table`].
    pub fn view_mode(&self, screen: CatalogScreen) -> ViewMode {
        let conn = match self.db.conn.lock() {
            Ok(c) => c,
            Err(_) => return ViewMode::default(),
        };
        db::get_setting(&conn, VIEW_MODE_CATEGORY, screen.key())
            .and_then(|raw| raw.parse::<ViewMode>().ok())
            .unwrap_or_default()
    }

    pub fn set_view_mode(&self, screen: CatalogScreen, mode: ViewMode) -> AppResult<()> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| AppError::Database(e.to_string()))?;
        db::set_setting(&conn, VIEW_MODE_CATEGORY, screen.key(), &mode.to_string())
            .map_err(AppError::Database)?;
        debug!(screen = screen.key(), mode = %mode, "view mode saved");
        Ok(())
    }

    /// Stored view modes keyed by screen. Unrecognised values are skipped.
    pub fn view_modes(&self) -> AppResult<Vec<(CatalogScreen, ViewMode)>> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(db::get_category(&conn, VIEW_MODE_CATEGORY)
            .into_iter()
            .filter_map(|(key, value)| Some((key.parse().ok()?, value.parse().ok()?)))
            .collect())
    }

    /// Forget every stored view mode.
    pub fn reset(&self) -> AppResult<()> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| AppError::Database(e.to_string()))?;
        db::delete_all_settings(&conn, VIEW_MODE_CATEGORY).map_err(AppError::Database)?;
        debug!("view modes reset");
        Ok(())
    }
}
