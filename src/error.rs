//! Error taxonomy shared by every screen-facing operation.
//!
//! HTTP failures are classified once at the network boundary (see
//! [`AppError::from_status`]) so callers can branch on the variant instead of
//! inspecting status codes or message strings.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

pub type AppResult<T> = Result<T, AppError>;

// ---------------------------------------------------------------------------
// Field errors
// ---------------------------------------------------------------------------

/// A single schema violation, rendered inline under the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Ordered list of field violations for one form submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        Self(vec![FieldError {
            field: field.to_string(),
            message: message.into(),
        }])
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn for_field(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut out = FieldErrors::default();
        for (field, errs) in errors.field_errors() {
            for err in errs.iter() {
                let message = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid value ({})", err.code));
                out.push(&field.to_string(), message);
            }
        }
        // HashMap iteration order is arbitrary; keep output stable for the UI.
        out.0.sort_by(|a, b| a.field.cmp(&b.field));
        out
    }
}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppError {
    /// Schema-level violations. Never reaches the network.
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    /// HTTP 409. `field` is the duplicated column when the server text names it.
    #[error("{message}")]
    Conflict {
        field: Option<String>,
        message: String,
    },

    /// HTTP 404, or a local lookup that found nothing.
    #[error("{0} not found")]
    NotFound(String),

    /// HTTP 401/403.
    #[error("{message}")]
    Auth { status: u16, message: String },

    /// HTTP 5xx or any status we do not classify.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// The request never produced a response.
    #[error("{0}")]
    Network(String),

    /// A response body did not match its schema.
    #[error("invalid response: {0}")]
    Decode(String),

    /// An order's embedded item list could not be decoded.
    #[error("order {order_id} has a malformed item list: {reason}")]
    MalformedItems { order_id: i64, reason: String },

    /// The owning screen was left before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    #[error("credential storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(FieldErrors::single(field, message))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Classify a non-success HTTP status. `body` is the raw response text and
    /// `resource` names what was requested (used for 404 messages).
    pub fn from_status(status: u16, body: &str, resource: &str) -> Self {
        let server_message = extract_server_message(body);
        match status {
            404 => AppError::NotFound(resource.to_string()),
            401 => AppError::Auth {
                status,
                message: server_message
                    .unwrap_or_else(|| "Your session has expired, please sign in again".into()),
            },
            403 => AppError::Auth {
                status,
                message: server_message
                    .unwrap_or_else(|| "You are not allowed to perform this action".into()),
            },
            409 => {
                let text = server_message.clone().unwrap_or_else(|| body.to_string());
                let field = duplicate_field(&text);
                let message = match &field {
                    Some(f) => format!("A record with this {f} already exists"),
                    None => server_message.unwrap_or_else(|| "This record already exists".into()),
                };
                AppError::Conflict { field, message }
            }
            400 | 422 => AppError::Validation(FieldErrors::single(
                "form",
                server_message.unwrap_or_else(|| "The server rejected the submitted data".into()),
            )),
            s => AppError::Server {
                status: s,
                message: server_message
                    .map(|m| format!("{m} (HTTP {s})"))
                    .unwrap_or_else(|| format!("Server error (HTTP {s})")),
            },
        }
    }

    /// Text shown to the user in a notice. Server internals are not echoed
    /// for 5xx responses.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(fields) => match fields.0.first() {
                Some(first) if fields.0.len() == 1 => first.message.clone(),
                _ => "Please correct the highlighted fields".to_string(),
            },
            AppError::Conflict { message, .. } => message.clone(),
            AppError::NotFound(what) => format!("{what} was not found"),
            AppError::Auth { message, .. } => message.clone(),
            AppError::Server { .. } => "Something went wrong, please try again later".to_string(),
            AppError::Network(message) => message.clone(),
            AppError::Decode(_) | AppError::MalformedItems { .. } => {
                "Received unexpected data from the server".to_string()
            }
            AppError::Cancelled => "The operation was cancelled".to_string(),
            AppError::Storage(_) | AppError::Database(_) => {
                "Local storage is unavailable".to_string()
            }
        }
    }

    /// Field errors for inline rendering, if any.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            AppError::Validation(fields) => Some(fields),
            _ => None,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.into())
    }
}

// ---------------------------------------------------------------------------
// Server text helpers
// ---------------------------------------------------------------------------

/// Pull `message` / `error` out of a JSON error body, falling back to the raw
/// trimmed text for non-JSON bodies.
fn extract_server_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let from_json = ["message", "error", "detail"]
            .iter()
            .filter_map(|k| json.get(*k))
            .find_map(|v| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => {
                    Some(s.trim().to_string())
                }
                serde_json::Value::Array(items) => items
                    .iter()
                    .filter_map(|i| i.get("message").and_then(|m| m.as_str()))
                    .next()
                    .map(str::to_string),
                _ => None,
            });
        return from_json;
    }
    Some(trimmed.to_string())
}

fn conflict_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // PostgreSQL: Key (email)=(a@b.c) already exists.
            r"Key \((?:\w+\.)?(?P<field>\w+)\)=\(.*\) already exists",
            // MySQL: Duplicate entry 'x' for key 'users.email'
            r"Duplicate entry '.*' for key '(?:\w+\.)?(?P<field>\w+)'",
            // ORM validators: email must be unique
            r"(?P<field>\w+) must be unique",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Name of the duplicated column in a constraint-violation message.
pub fn duplicate_field(text: &str) -> Option<String> {
    conflict_patterns()
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.name("field").map(|m| m.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_field_from_postgres_detail() {
        assert_eq!(
            duplicate_field("Key (email)=(chef@example.com) already exists."),
            Some("email".to_string())
        );
    }

    #[test]
    fn duplicate_field_from_mysql_and_orm_texts() {
        assert_eq!(
            duplicate_field("Duplicate entry 'Main St' for key 'branches.branch_name'"),
            Some("branch_name".to_string())
        );
        assert_eq!(
            duplicate_field("productName must be unique"),
            Some("productName".to_string())
        );
        assert_eq!(duplicate_field("something else broke"), None);
    }

    #[test]
    fn conflict_status_names_the_field() {
        let err = AppError::from_status(
            409,
            r#"{"message":"Key (product_name)=(Tomato) already exists."}"#,
            "product",
        );
        assert_eq!(
            err,
            AppError::Conflict {
                field: Some("product_name".to_string()),
                message: "A record with this product_name already exists".to_string(),
            }
        );
    }

    #[test]
    fn status_classification() {
        assert!(AppError::from_status(404, "", "inventory record").is_not_found());
        assert!(matches!(
            AppError::from_status(401, "", "user"),
            AppError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            AppError::from_status(403, "{}", "user"),
            AppError::Auth { status: 403, .. }
        ));
        assert!(matches!(
            AppError::from_status(500, "boom", "order"),
            AppError::Server { status: 500, .. }
        ));
        assert!(matches!(
            AppError::from_status(418, "", "order"),
            AppError::Server { status: 418, .. }
        ));
    }

    #[test]
    fn server_errors_hide_internal_text_from_users() {
        let err = AppError::from_status(500, "stack trace at line 7", "order");
        assert_eq!(
            err.user_message(),
            "Something went wrong, please try again later"
        );
    }

    #[test]
    fn single_field_error_uses_its_message() {
        let err = AppError::validation("quantity", "Quantity cannot be negative");
        assert_eq!(err.user_message(), "Quantity cannot be negative");
        assert_eq!(
            err.field_errors().and_then(|f| f.for_field("quantity")),
            Some("Quantity cannot be negative")
        );
    }
}
