//! JSON command handlers invoked by the screens.
//!
//! Every handler takes the shared [`AppState`] and a JSON payload and returns
//! `{ success, data?, notice?, fieldErrors? }`. Failures never propagate:
//! validation problems come back as inline field errors, everything else is
//! logged here and turned into a transient notice.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::error::{AppError, FieldErrors};
use crate::notice::Notice;
use crate::AppState;

pub mod catalog;
pub mod inventory;
pub mod onboarding;
pub mod orders;
pub mod preferences;
pub mod session;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

pub(crate) fn ok(data: impl Serialize) -> Value {
    json!({ "success": true, "data": data })
}

pub(crate) fn ok_with_notice(data: impl Serialize, notice: Notice) -> Value {
    json!({ "success": true, "data": data, "notice": notice })
}

/// Degrade an error into a response the screen can render.
pub(crate) fn failure(state: &AppState, action: &str, err: AppError) -> Value {
    match &err {
        AppError::Validation(fields) => {
            debug!(action, errors = %fields, "validation failed");
            json!({ "success": false, "fieldErrors": fields })
        }
        AppError::Cancelled => {
            debug!(action, "screen left before the operation finished");
            json!({ "success": false, "cancelled": true })
        }
        AppError::Conflict { field, .. } => {
            warn!(action, error = %err, "conflict");
            let mut body = json!({
                "success": false,
                "notice": Notice::from_error(&err, &state.config),
            });
            if let Some(field) = field {
                body["fieldErrors"] = json!(FieldErrors::single(field, err.user_message()));
            }
            body
        }
        AppError::Server { .. } | AppError::Network(_) | AppError::Database(_) | AppError::Storage(_) => {
            error!(action, error = %err, "command failed");
            json!({ "success": false, "notice": Notice::from_error(&err, &state.config) })
        }
        _ => {
            warn!(action, error = %err, "command failed");
            json!({ "success": false, "notice": Notice::from_error(&err, &state.config) })
        }
    }
}

/// Decode a typed payload. Missing or mistyped fields are a validation
/// failure on the `payload` field.
pub(crate) fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, AppError> {
    serde_json::from_value(payload).map_err(|e| AppError::validation("payload", e.to_string()))
}

/// Run one handler and fold its result into the response envelope.
pub(crate) fn respond(state: &AppState, action: &str, result: Result<Value, AppError>) -> Value {
    result.unwrap_or_else(|err| failure(state, action, err))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Route a named command to its handler.
pub async fn invoke(state: &AppState, command: &str, payload: Value) -> Value {
    match command {
        "session_get" => session::session_get(state).await,
        "session_login" => session::session_login(state, payload).await,
        "session_refresh" => session::session_refresh(state).await,
        "session_logout" => session::session_logout(state).await,
        "session_set_language" => session::session_set_language(state, payload).await,
        "session_select_branch" => session::session_select_branch(state, payload).await,

        "preferences_get_view_mode" => preferences::preferences_get_view_mode(state, payload),
        "preferences_set_view_mode" => preferences::preferences_set_view_mode(state, payload),
        "preferences_list" => preferences::preferences_list(state),
        "preferences_reset" => preferences::preferences_reset(state),
        "config_get" => preferences::config_get(state),
        "config_update" => preferences::config_update(state, payload),

        "catalog_load" => catalog::catalog_load(state, payload).await,
        "catalog_view" => catalog::catalog_view(state, payload).await,
        "catalog_create_product" => catalog::catalog_create_product(state, payload).await,
        "catalog_create_food_item" => catalog::catalog_create_food_item(state, payload).await,

        "inventory_load" => inventory::inventory_load(state).await,
        "inventory_edit" => inventory::inventory_edit(state, payload).await,
        "inventory_discard" => inventory::inventory_discard(state).await,
        "inventory_save" => inventory::inventory_save(state).await,

        "orders_load" => orders::orders_load(state).await,
        "orders_toggle_item" => orders::orders_toggle_item(state, payload).await,
        "orders_confirm_delivery" => orders::orders_confirm_delivery(state, payload).await,
        "cart_get" => orders::cart_get(state).await,
        "cart_set_supplier" => orders::cart_set_supplier(state, payload).await,
        "cart_add_line" => orders::cart_add_line(state, payload).await,
        "cart_remove_line" => orders::cart_remove_line(state, payload).await,
        "cart_submit" => orders::cart_submit(state).await,

        "onboarding_create_organisation" => {
            onboarding::onboarding_create_organisation(state, payload).await
        }
        "onboarding_create_branch" => onboarding::onboarding_create_branch(state, payload).await,

        "screen_leave" => {
            state.leave_screen();
            ok(Value::Null)
        }
        other => {
            warn!(command = other, "unknown command");
            failure(
                state,
                "invoke",
                AppError::NotFound(format!("command {other}")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn validation_errors_render_inline_without_notice() {
        let state = test_support::state_for("http://localhost:1");
        let body = failure(
            &state,
            "test",
            AppError::validation("quantity", "Quantity cannot be negative"),
        );
        assert_eq!(body["success"], json!(false));
        assert!(body.get("notice").is_none());
        assert_eq!(body["fieldErrors"][0]["field"], json!("quantity"));
    }

    #[test]
    fn conflicts_carry_notice_and_field() {
        let state = test_support::state_for("http://localhost:1");
        let body = failure(
            &state,
            "test",
            AppError::Conflict {
                field: Some("email".into()),
                message: "email must be unique".into(),
            },
        );
        assert_eq!(body["notice"]["kind"], json!("error"));
        assert_eq!(body["notice"]["dismissAfterMs"], json!(6000));
        assert_eq!(body["fieldErrors"][0]["field"], json!("email"));
    }

    #[test]
    fn auth_failures_use_a_banner() {
        let state = test_support::state_for("http://localhost:1");
        let body = failure(
            &state,
            "test",
            AppError::Auth {
                status: 401,
                message: "expired".into(),
            },
        );
        assert_eq!(body["notice"]["surface"], json!("banner"));
        assert_eq!(body["notice"]["dismissAfterMs"], json!(10_000));
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let state = test_support::state_for("http://localhost:1");
        let body = invoke(&state, "no_such_command", json!({})).await;
        assert_eq!(body["success"], json!(false));
        assert!(body["notice"]["message"].is_string());
    }

    #[tokio::test]
    async fn screen_leave_rotates_the_token() {
        let state = test_support::state_for("http://localhost:1");
        let token = state.screen_token();
        let body = invoke(&state, "screen_leave", Value::Null).await;
        assert_eq!(body["success"], json!(true));
        assert!(token.is_cancelled());
    }
}
