//! First-run setup: creating the organisation and its branches.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::info;
use validator::Validate;

use crate::api::ApiClient;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::models::{Branch, Organisation};
use crate::session::Session;

fn phone_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9][0-9 ()\-]{5,19}$").ok())
        .as_ref()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrganisationForm {
    #[validate(length(min = 1, max = 100, message = "Organisation name must be 1 to 100 characters"))]
    pub organisation_name: String,
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl OrganisationForm {
    /// Declarative rules plus the optional phone format.
    pub fn check(&self) -> AppResult<()> {
        let mut errors = match self.validate() {
            Ok(()) => FieldErrors::default(),
            Err(e) => FieldErrors::from(e),
        };
        if let Some(phone) = self.phone.as_deref().map(str::trim) {
            let valid = phone_pattern().map_or(true, |re| re.is_match(phone));
            if !phone.is_empty() && !valid {
                errors.push("phone", "Enter a valid phone number");
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BranchForm {
    #[validate(length(min = 1, max = 100, message = "Branch name must be 1 to 100 characters"))]
    pub branch_name: String,
    #[validate(length(min = 1, max = 200, message = "Address is required"))]
    pub address: String,
    /// Defaults to the session's organisation.
    #[serde(default)]
    pub organisation_id: Option<i64>,
}

/// Create the organisation and make it the session's organisation.
pub async fn create_organisation(
    session: &mut Session,
    api: &ApiClient,
    form: OrganisationForm,
) -> AppResult<Organisation> {
    form.check()?;
    let body = serde_json::json!({
        "organisationName": form.organisation_name.trim(),
        "email": form.email.trim(),
        "phone": form.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()),
    });
    let organisation: Organisation = session
        .client(api)
        .post_json(&api.endpoints().organisations, &body, "organisation")
        .await?;
    session.select_organisation(organisation.organisation_id)?;
    info!(
        organisation_id = organisation.organisation_id,
        "organisation created"
    );
    Ok(organisation)
}

/// Create a branch and make it the active branch.
pub async fn create_branch(
    session: &mut Session,
    api: &ApiClient,
    form: BranchForm,
) -> AppResult<Branch> {
    form.validate()?;
    let organisation_id = form
        .organisation_id
        .or_else(|| session.identity().and_then(|i| i.organisation_id))
        .ok_or_else(|| AppError::validation("organisationId", "Create an organisation first"))?;
    let body = serde_json::json!({
        "branchName": form.branch_name.trim(),
        "address": form.address.trim(),
        "organisationId": organisation_id,
    });
    let branch: Branch = session
        .client(api)
        .post_json(&api.endpoints().branches, &body, "branch")
        .await?;
    session.select_branch(branch.branch_id)?;
    info!(branch_id = branch.branch_id, organisation_id, "branch created");
    Ok(branch)
}
