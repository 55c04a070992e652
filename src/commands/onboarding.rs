use serde_json::Value;

use super::{ok_with_notice, parse_payload, respond};
use crate::error::AppResult;
use crate::notice::Notice;
use crate::onboarding::{self, BranchForm, OrganisationForm};
use crate::AppState;

pub async fn onboarding_create_organisation(state: &AppState, payload: Value) -> Value {
    respond(
        state,
        "onboarding_create_organisation",
        create_organisation_inner(state, payload).await,
    )
}

async fn create_organisation_inner(state: &AppState, payload: Value) -> AppResult<Value> {
    let form: OrganisationForm = parse_payload(payload)?;
    let mut session = state.session.write().await;
    let organisation = onboarding::create_organisation(&mut session, state.api(), form).await?;
    Ok(ok_with_notice(
        organisation,
        Notice::success("Organisation created", &state.config),
    ))
}

pub async fn onboarding_create_branch(state: &AppState, payload: Value) -> Value {
    respond(
        state,
        "onboarding_create_branch",
        create_branch_inner(state, payload).await,
    )
}

async fn create_branch_inner(state: &AppState, payload: Value) -> AppResult<Value> {
    let form: BranchForm = parse_payload(payload)?;
    let mut session = state.session.write().await;
    let branch = onboarding::create_branch(&mut session, state.api(), form).await?;
    drop(session);
    // The new branch becomes active; branch-scoped screens start over.
    state.leave_screen();
    Ok(ok_with_notice(
        branch,
        Notice::success("Branch created", &state.config),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn invalid_organisation_is_rejected_before_any_request() {
        let server = MockServer::start().await;
        let state =
            test_support::state_with_store(&server.uri(), test_support::signed_in_store());
        let body = onboarding_create_organisation(
            &state,
            json!({ "organisationName": "", "email": "nope" }),
        )
        .await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["fieldErrors"].as_array().map(Vec::len), Some(2));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn duplicate_branch_name_is_a_conflict_on_that_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/branches"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "Duplicate entry 'Harbour' for key 'branches.branch_name'"
            })))
            .mount(&server)
            .await;
        let state =
            test_support::state_with_store(&server.uri(), test_support::signed_in_store());

        let body = onboarding_create_branch(
            &state,
            json!({ "branchName": "Harbour", "address": "1 Quay St" }),
        )
        .await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["fieldErrors"][0]["field"], json!("branch_name"));
        assert_eq!(body["notice"]["kind"], json!("error"));
        assert_eq!(state.session.read().await.active_branch(), Ok(7));
    }
}
