use serde_json::{json, Value};
use tracing::info;

use super::{failure, ok, ok_with_notice, respond};
use crate::error::AppError;
use crate::notice::Notice;
use crate::session::{LoginForm, Session};
use crate::{value_i64, value_str, AppState};

fn session_summary(session: &Session) -> Value {
    json!({
        "authenticated": session.is_authenticated(),
        "identity": session.identity(),
        "dashboard": session.identity().map(|i| i.role.dashboard()),
        "language": session.language(),
    })
}

pub async fn session_get(state: &AppState) -> Value {
    let session = state.session.read().await;
    ok(session_summary(&session))
}

pub async fn session_login(state: &AppState, payload: Value) -> Value {
    let form = LoginForm {
        username: value_str(&payload, &["username", "email"]).unwrap_or_default(),
        password: payload
            .get("password")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    };
    let mut session = state.session.write().await;
    let result = session.login(state.api(), form).await.map(|_| ());
    let result = result.map(|()| session_summary(&session));
    drop(session);
    match result {
        Ok(summary) => {
            // A different user must not inherit the previous user's screens.
            state.reset_screens().await;
            ok(summary)
        }
        Err(err) => failure(state, "session_login", err),
    }
}

pub async fn session_refresh(state: &AppState) -> Value {
    let mut session = state.session.write().await;
    let result = session.refresh(state.api()).await.map(|_| ());
    respond(
        state,
        "session_refresh",
        result.map(|()| ok(session_summary(&session))),
    )
}

pub async fn session_logout(state: &AppState) -> Value {
    let result = state.session.write().await.logout();
    state.reset_screens().await;
    respond(
        state,
        "session_logout",
        result.map(|()| ok_with_notice(Value::Null, Notice::info("Signed out", &state.config))),
    )
}

pub async fn session_set_language(state: &AppState, payload: Value) -> Value {
    let raw = value_str(&payload, &["language", "lang"]).unwrap_or_default();
    let mut session = state.session.write().await;
    let result = session.set_language(&raw);
    respond(
        state,
        "session_set_language",
        result.map(|()| ok(session.language())),
    )
}

pub async fn session_select_branch(state: &AppState, payload: Value) -> Value {
    let result = match value_i64(&payload, &["branchId", "branch_id"]) {
        Some(branch_id) => {
            let mut session = state.session.write().await;
            session.select_branch(branch_id).map(|()| branch_id)
        }
        None => Err(AppError::validation("branchId", "Select a branch")),
    };
    match result {
        Ok(branch_id) => {
            // Inventory and orders are branch-scoped; drop work for the old one.
            state.leave_screen();
            info!(branch_id, "branch switched");
            ok(json!({ "branchId": branch_id }))
        }
        Err(err) => failure(state, "session_select_branch", err),
    }
}
