use serde_json::{json, Value};
use tracing::info;

use super::{ok, ok_with_notice, respond};
use crate::config::ClientConfig;
use crate::error::AppError;
use crate::notice::Notice;
use crate::preferences::{CatalogScreen, ViewMode};
use crate::{value_str, AppState};

fn screen_from(payload: &Value) -> Result<CatalogScreen, AppError> {
    value_str(payload, &["screen"])
        .unwrap_or_default()
        .parse::<CatalogScreen>()
        .map_err(|e| AppError::validation("screen", e))
}

pub fn preferences_get_view_mode(state: &AppState, payload: Value) -> Value {
    let result = screen_from(&payload).map(|screen| {
        ok(json!({ "viewMode": state.preferences.view_mode(screen).to_string() }))
    });
    respond(state, "preferences_get_view_mode", result)
}

pub fn preferences_set_view_mode(state: &AppState, payload: Value) -> Value {
    let result = screen_from(&payload).and_then(|screen| {
        let mode = value_str(&payload, &["viewMode", "mode"])
            .unwrap_or_default()
            .parse::<ViewMode>()
            .map_err(|e| AppError::validation("viewMode", e))?;
        state.preferences.set_view_mode(screen, mode)?;
        Ok(ok(json!({ "viewMode": mode.to_string() })))
    });
    respond(state, "preferences_set_view_mode", result)
}

pub fn preferences_list(state: &AppState) -> Value {
    let result = state.preferences.view_modes().map(|modes| {
        let modes: serde_json::Map<String, Value> = modes
            .into_iter()
            .map(|(screen, mode)| (screen.key().to_string(), json!(mode.to_string())))
            .collect();
        ok(modes)
    });
    respond(state, "preferences_list", result)
}

pub fn preferences_reset(state: &AppState) -> Value {
    let result = state
        .preferences
        .reset()
        .map(|()| ok_with_notice(Value::Null, Notice::info("View preferences reset", &state.config)));
    respond(state, "preferences_reset", result)
}

/// Effective client configuration, for the settings screen.
pub fn config_get(state: &AppState) -> Value {
    ok(&state.config)
}

/// Store configuration changes. They take effect on the next start.
/// Edits apply to the stored configuration, never to environment overrides.
pub fn config_update(state: &AppState, payload: Value) -> Value {
    let result = state
        .db
        .conn
        .lock()
        .map_err(|e| AppError::Database(e.to_string()))
        .and_then(|conn| {
            let updated = ClientConfig::load_stored(&conn)
                .with_patch(&payload)
                .map_err(|e| AppError::validation("config", e))?;
            updated.save(&conn).map_err(AppError::Database)?;
            info!(api_base_url = %updated.api_base_url, "client config saved");
            Ok(ok_with_notice(
                updated,
                Notice::info("Settings saved. Restart to apply them.", &state.config),
            ))
        });
    respond(state, "config_update", result)
}
