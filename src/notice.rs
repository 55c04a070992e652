//! Transient user notices (toasts and banners).

use serde::Serialize;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Success,
    Error,
    Info,
}

/// Where the notice is rendered. Auth failures use a banner, everything else
/// a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeSurface {
    Toast,
    Banner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub kind: NoticeKind,
    pub surface: NoticeSurface,
    pub message: String,
    #[serde(rename = "dismissAfterMs", serialize_with = "as_millis")]
    pub dismiss_after: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl Notice {
    pub fn success(message: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            kind: NoticeKind::Success,
            surface: NoticeSurface::Toast,
            message: message.into(),
            dismiss_after: Duration::from_secs(config.success_notice_secs),
        }
    }

    pub fn info(message: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            kind: NoticeKind::Info,
            surface: NoticeSurface::Toast,
            message: message.into(),
            dismiss_after: Duration::from_secs(config.success_notice_secs),
        }
    }

    pub fn failure(message: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            kind: NoticeKind::Error,
            surface: NoticeSurface::Toast,
            message: message.into(),
            dismiss_after: Duration::from_secs(config.error_notice_secs),
        }
    }

    pub fn from_error(err: &AppError, config: &ClientConfig) -> Self {
        match err {
            AppError::Auth { .. } => Self {
                kind: NoticeKind::Error,
                surface: NoticeSurface::Banner,
                message: err.user_message(),
                dismiss_after: Duration::from_secs(config.banner_notice_secs),
            },
            _ => Self::failure(err.user_message(), config),
        }
    }
}
