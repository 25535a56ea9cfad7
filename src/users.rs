//! User identity and profile surface.
//!
//! The gateway in front of this service has already authenticated the
//! chat user; it forwards the numeric id in `X-User-Id`. Users are
//! created lazily on first contact.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::User;
use crate::tz::TzPref;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Extracts the external user id forwarded by the gateway.
#[derive(Debug)]
pub struct ExternalUser(pub i64);

#[async_trait]
impl FromRequestParts<AppState> for ExternalUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing X-User-Id header".into()))?;

        let id = raw
            .parse::<i64>()
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid X-User-Id header".into()))?;

        Ok(ExternalUser(id))
    }
}

// --- DTOs ---

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub external_id: i64,
    pub goal: Option<String>,
    pub language: String,
    pub tz_mode: Option<String>,
    pub tz_name: Option<String>,
    pub tz_offset_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            external_id: u.external_id,
            goal: u.goal,
            language: u.language,
            tz_mode: u.tz_mode,
            tz_name: u.tz_name,
            tz_offset_minutes: u.tz_offset_minutes,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GoalUpdate {
    pub goal: String,
}

#[derive(Debug, Deserialize)]
pub struct TimezoneUpdate {
    pub tz_mode: String,
    #[serde(default)]
    pub tz_name: Option<String>,
    #[serde(default)]
    pub tz_offset_minutes: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct LanguageUpdate {
    pub language: String,
}

// --- HTTP surface ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/me/goal", put(put_goal))
        .route("/me/timezone", put(put_timezone))
        .route("/me/language", put(put_language))
}

#[instrument(skip(state))]
async fn get_me(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
) -> Result<Json<UserProfile>, AppError> {
    let user = state.users.get_or_create(external_id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
async fn put_goal(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
    Json(body): Json<GoalUpdate>,
) -> Result<Json<UserProfile>, AppError> {
    let goal = body.goal.trim();
    if goal.is_empty() {
        return Err(AppError::Validation("goal must not be empty".into()));
    }
    let user = state.users.get_or_create(external_id).await?;
    let user = state.users.update_goal(user.id, goal).await?;
    Ok(Json(user.into()))
}

/// The descriptor is validated here, before it is stored; saved meals
/// keep the snapshot they were created with.
#[instrument(skip(state))]
async fn put_timezone(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
    Json(body): Json<TimezoneUpdate>,
) -> Result<Json<UserProfile>, AppError> {
    TzPref::from_user(
        Some(&body.tz_mode),
        body.tz_name.as_deref(),
        body.tz_offset_minutes,
    )?;

    let user = state.users.get_or_create(external_id).await?;
    let user = state
        .users
        .update_timezone(
            user.id,
            &body.tz_mode,
            body.tz_name.as_deref(),
            body.tz_offset_minutes,
        )
        .await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
async fn put_language(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
    Json(body): Json<LanguageUpdate>,
) -> Result<Json<UserProfile>, AppError> {
    let language = body.language.trim();
    if language.len() != 2 || !language.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::Validation(
            "language must be a two-letter code".into(),
        ));
    }
    let user = state.users.get_or_create(external_id).await?;
    let user = state.users.update_language(user.id, language).await?;
    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use crate::tz::{TZ_MODE_CITY, TZ_MODE_OFFSET};

    #[tokio::test]
    async fn timezone_descriptor_rejected_before_storage() {
        // An unknown IANA name never reaches the store.
        let err = TzPref::from_user(Some(TZ_MODE_CITY), Some("Atlantis/Lemuria"), None)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn profile_updates_roundtrip() {
        let state = AppState::fake();
        let user = state.users.get_or_create(7).await.unwrap();

        let updated = state.users.update_goal(user.id, "lose weight").await.unwrap();
        assert_eq!(updated.goal.as_deref(), Some("lose weight"));

        let updated = state
            .users
            .update_timezone(user.id, TZ_MODE_OFFSET, None, Some(180))
            .await
            .unwrap();
        assert_eq!(updated.tz_mode.as_deref(), Some(TZ_MODE_OFFSET));
        assert_eq!(updated.tz_offset_minutes, Some(180));

        let updated = state.users.update_language(user.id, "ru").await.unwrap();
        assert_eq!(updated.language, "RU");
    }
}
