use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::messages;

/// Which time-windowed mutation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Edit,
    Delete,
}

/// Domain error taxonomy. Recoverable conditions carry enough context
/// for the HTTP layer to render a user-facing message; everything else
/// collapses to a generic 500 without leaking internals.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    /// An entry already exists for this (chat_id, message_id) pair.
    /// Callers on the save path treat this as a no-op success.
    #[error("entry already exists for this source message")]
    DuplicateSource,

    /// Absent, soft-deleted, or owned by another user — deliberately
    /// indistinguishable from the caller's point of view.
    #[error("not found")]
    NotFound,

    #[error("{kind:?} window expired ({hours}h)")]
    WindowExpired { kind: WindowKind, hours: i64 },

    #[error("too many requests")]
    Throttled,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::DuplicateSource => (StatusCode::CONFLICT, messages::ALREADY_SAVED.to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, messages::MEAL_NOT_FOUND.to_string()),
            AppError::WindowExpired { kind, hours } => {
                let body = match kind {
                    WindowKind::Edit => messages::edit_window_expired(*hours),
                    WindowKind::Delete => messages::delete_window_expired(*hours),
                };
                (StatusCode::CONFLICT, body)
            }
            AppError::Throttled => (StatusCode::TOO_MANY_REQUESTS, messages::THROTTLE.to_string()),
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, body).into_response()
    }
}
