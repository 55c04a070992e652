//! Session and language context.
//!
//! A [`Session`] is constructed once at start from the persisted attributes
//! and handed to every screen through `AppState`. It is only re-synchronised
//! through the explicit [`Session::refresh`] call; nothing re-reads storage
//! behind its back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;
use zeroize::Zeroizing;

use crate::api::ApiClient;
use crate::config::render_path;
use crate::error::{AppError, AppResult};
use crate::models::{BranchId, LoginResponse, UserDto};
use crate::storage::{self, CredentialStore};

// ---------------------------------------------------------------------------
// Role / language
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Chef,
    Operator,
}

impl Role {
    /// Route of the role's landing dashboard.
    pub fn dashboard(&self) -> &'static str {
        match self {
            Role::Admin => "/admin/dashboard",
            Role::Manager => "/manager/dashboard",
            Role::Chef => "/chef/dashboard",
            Role::Operator => "/operator/dashboard",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Chef => "chef",
            Role::Operator => "operator",
        }
    }

    /// Admins and managers may edit catalog and inventory data.
    pub fn can_manage_stock(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.trim_start_matches("role_") {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "chef" => Ok(Role::Chef),
            "operator" => Ok(Role::Operator),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Display language code (`en`, `fr`, `ar`, ...). Strings themselves are
/// resolved by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Language(String);

impl Language {
    pub fn parse(raw: &str) -> Option<Self> {
        let code = raw.trim().to_ascii_lowercase();
        let valid = (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_lowercase());
        valid.then_some(Self(code))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl Default for Language {
    fn default() -> Self {
        Self("en".to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub organisation_id: Option<i64>,
    pub branch_id: Option<BranchId>,
}

impl TryFrom<UserDto> for Identity {
    type Error = AppError;

    fn try_from(user: UserDto) -> Result<Self, Self::Error> {
        let role = user.role.parse::<Role>().map_err(AppError::Decode)?;
        Ok(Identity {
            user_id: user.user_id,
            username: user.username,
            role,
            organisation_id: user.organisation_id,
            branch_id: user.branch_id,
        })
    }
}

#[derive(Debug, Clone, Validate)]
pub struct LoginForm {
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    store: Arc<dyn CredentialStore>,
    token: Option<Zeroizing<String>>,
    identity: Option<Identity>,
    language: Language,
}

impl Session {
    /// Seed the session from persisted attributes. No network access.
    ///
    /// A partially persisted identity (token without user id, unknown role)
    /// is treated as signed out.
    pub fn load(store: Arc<dyn CredentialStore>) -> Self {
        let language = store
            .get(storage::KEY_LANGUAGE)
            .and_then(|raw| Language::parse(&raw))
            .unwrap_or_default();

        let token = store
            .get(storage::KEY_AUTH_TOKEN)
            .filter(|t| !t.trim().is_empty())
            .map(Zeroizing::new);

        let identity = token.as_ref().and_then(|_| {
            let user_id = storage::get_i64(store.as_ref(), storage::KEY_USER_ID)?;
            let role = store.get(storage::KEY_ROLE)?.parse::<Role>().ok()?;
            Some(Identity {
                user_id,
                username: store.get(storage::KEY_USERNAME).unwrap_or_default(),
                role,
                organisation_id: storage::get_i64(store.as_ref(), storage::KEY_ORG_ID),
                branch_id: storage::get_i64(store.as_ref(), storage::KEY_BRANCH_ID),
            })
        });

        let token = if identity.is_some() { token } else { None };
        info!(
            authenticated = identity.is_some(),
            language = %language,
            "session loaded from storage"
        );

        Self {
            store,
            token,
            identity,
            language,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some() && self.token.is_some()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.as_str())
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// The branch every inventory and order operation is scoped to.
    pub fn active_branch(&self) -> AppResult<BranchId> {
        self.identity
            .as_ref()
            .and_then(|i| i.branch_id)
            .ok_or_else(|| AppError::validation("branchId", "Select a branch first"))
    }

    /// Client authorised with this session's token.
    pub fn client(&self, base: &ApiClient) -> ApiClient {
        base.with_token(self.token())
    }

    pub async fn login(&mut self, api: &ApiClient, form: LoginForm) -> AppResult<&Identity> {
        form.validate()?;
        let body = serde_json::json!({
            "username": form.username.trim(),
            "password": form.password,
        });
        let resp: LoginResponse = api
            .with_token(None)
            .post_json(&api.endpoints().login, &body, "login")
            .await?;
        let identity = Identity::try_from(resp.user)?;

        self.store
            .set(storage::KEY_AUTH_TOKEN, &resp.token)
            .map_err(AppError::Storage)?;
        self.token = Some(Zeroizing::new(resp.token));
        self.persist_identity(&identity)?;
        info!(user_id = identity.user_id, role = identity.role.as_str(), "signed in");
        Ok(&*self.identity.insert(identity))
    }

    /// Re-fetch the current user with one request. An auth failure signs the
    /// session out.
    pub async fn refresh(&mut self, api: &ApiClient) -> AppResult<&Identity> {
        let user_id = match (&self.identity, &self.token) {
            (Some(identity), Some(_)) => identity.user_id,
            _ => {
                return Err(AppError::Auth {
                    status: 401,
                    message: "Not signed in".into(),
                })
            }
        };
        let path = render_path(&api.endpoints().user, &[("userId", user_id)]);
        let user: UserDto = match self.client(api).get_json(&path, "user").await {
            Ok(u) => u,
            Err(err @ AppError::Auth { .. }) => {
                warn!(user_id, "session rejected by server, signing out");
                self.logout()?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let mut identity = Identity::try_from(user)?;
        // Keep a locally selected branch when the server has no default.
        if identity.branch_id.is_none() {
            identity.branch_id = self.identity.as_ref().and_then(|i| i.branch_id);
        }
        self.persist_identity(&identity)?;
        Ok(&*self.identity.insert(identity))
    }

    pub fn logout(&mut self) -> AppResult<()> {
        storage::clear_session(self.store.as_ref()).map_err(AppError::Storage)?;
        // Zeroizing wipes the buffer on drop.
        self.token = None;
        self.identity = None;
        info!("signed out");
        Ok(())
    }

    pub fn set_language(&mut self, raw: &str) -> AppResult<()> {
        let language = Language::parse(raw)
            .ok_or_else(|| AppError::validation("language", "Unsupported language code"))?;
        self.store
            .set(storage::KEY_LANGUAGE, language.code())
            .map_err(AppError::Storage)?;
        self.language = language;
        Ok(())
    }

    pub fn select_branch(&mut self, branch_id: BranchId) -> AppResult<()> {
        let identity = self.identity.as_mut().ok_or_else(|| AppError::Auth {
            status: 401,
            message: "Not signed in".into(),
        })?;
        self.store
            .set(storage::KEY_BRANCH_ID, &branch_id.to_string())
            .map_err(AppError::Storage)?;
        identity.branch_id = Some(branch_id);
        info!(branch_id, "active branch selected");
        Ok(())
    }

    pub fn select_organisation(&mut self, organisation_id: i64) -> AppResult<()> {
        let identity = self.identity.as_mut().ok_or_else(|| AppError::Auth {
            status: 401,
            message: "Not signed in".into(),
        })?;
        self.store
            .set(storage::KEY_ORG_ID, &organisation_id.to_string())
            .map_err(AppError::Storage)?;
        identity.organisation_id = Some(organisation_id);
        Ok(())
    }

    fn persist_identity(&self, identity: &Identity) -> AppResult<()> {
        let store = self.store.as_ref();
        let result = store
            .set(storage::KEY_USER_ID, &identity.user_id.to_string())
            .and_then(|_| store.set(storage::KEY_USERNAME, &identity.username))
            .and_then(|_| store.set(storage::KEY_ROLE, identity.role.as_str()))
            .and_then(|_| {
                storage::set_optional(
                    store,
                    storage::KEY_ORG_ID,
                    identity.organisation_id.map(|v| v.to_string()).as_deref(),
                )
            })
            .and_then(|_| {
                storage::set_optional(
                    store,
                    storage::KEY_BRANCH_ID,
                    identity.branch_id.map(|v| v.to_string()).as_deref(),
                )
            });
        result.map_err(AppError::Storage)
    }
}
