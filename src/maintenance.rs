//! Scheduled maintenance entrypoints.
//!
//! Both jobs are exposed as POST endpoints for an external scheduler
//! (cron hitting the service) rather than in-process timers, so a
//! restart mid-window cannot double-run them.

use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::error::AppError;
use crate::messages;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks/purge", post(run_purge))
        .route("/tasks/remind", post(run_remind))
}

#[derive(Debug, Serialize)]
pub struct PurgeReport {
    pub purged_entries: u64,
    pub dropped_drafts: usize,
}

#[derive(Debug, Serialize)]
pub struct RemindReport {
    pub text: &'static str,
    /// External ids of users claimed by this run; the caller is
    /// responsible for delivering the reminder to each of them.
    pub user_ids: Vec<i64>,
}

/// Hard-delete entries that have been soft-deleted longer than the
/// retention period, and drop expired drafts while we are here.
#[instrument(skip(state))]
async fn run_purge(State(state): State<AppState>) -> Result<Json<PurgeReport>, AppError> {
    let cutoff = Utc::now() - Duration::days(state.config.maintenance.purge_deleted_after_days);
    let purged_entries = state.meals.purge_deleted_before(cutoff).await?;
    let dropped_drafts = state.drafts.purge_expired();

    tracing::info!(purged_entries, dropped_drafts, "maintenance purge done");
    Ok(Json(PurgeReport {
        purged_entries,
        dropped_drafts,
    }))
}

/// Claim users who have gone quiet: active before the inactivity
/// cutoff and not reminded within the cooldown. Claiming stamps
/// `last_reminder_at` in the same statement, so overlapping runs
/// cannot pick the same user twice.
#[instrument(skip(state))]
async fn run_remind(State(state): State<AppState>) -> Result<Json<RemindReport>, AppError> {
    let now = Utc::now();
    let inactivity_cutoff =
        now - Duration::hours(state.config.maintenance.reminder_inactivity_hours);
    let cooldown_cutoff = now - Duration::hours(state.config.maintenance.reminder_cooldown_hours);

    let claimed = state
        .users
        .claim_inactive(inactivity_cutoff, cooldown_cutoff, now)
        .await?;
    let user_ids: Vec<i64> = claimed.iter().map(|u| u.external_id).collect();

    tracing::info!(count = user_ids.len(), "reminder claim done");
    Ok(Json(RemindReport {
        text: messages::REMINDER_TEXT,
        user_ids,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use crate::store::{MealNutrition, NewMealEntry};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn entry(user_id: Uuid, message_id: i64) -> NewMealEntry {
        NewMealEntry {
            user_id,
            chat_id: 1,
            message_id,
            source: "text".into(),
            original_text: None,
            photo_file_id: None,
            consumed_at: Utc::now(),
            local_date: NaiveDate::from_ymd_opt(2024, 6, 19).unwrap(),
            tz_name_snapshot: None,
            tz_offset_minutes_snapshot: Some(0),
            nutrition: MealNutrition {
                meal_name: "meal".into(),
                calories_kcal: 100,
                protein_g: 0.0,
                carbs_g: 0.0,
                fat_g: 0.0,
                weight_g: None,
                volume_ml: None,
                caffeine_mg: None,
                ingredients: serde_json::json!([]),
                raw_response: serde_json::json!({}),
            },
        }
    }

    #[tokio::test]
    async fn purge_respects_retention() {
        let state = AppState::fake();
        let user = state.users.get_or_create(7).await.unwrap();

        let recent = state.meals.create(entry(user.id, 1)).await.unwrap();
        let old = state.meals.create(entry(user.id, 2)).await.unwrap();

        let now = Utc::now();
        state.meals.soft_delete(recent.id, user.id, now).await.unwrap();
        state
            .meals
            .soft_delete(old.id, user.id, now - Duration::days(31))
            .await
            .unwrap();

        let cutoff = now - Duration::days(state.config.maintenance.purge_deleted_after_days);
        let purged = state.meals.purge_deleted_before(cutoff).await.unwrap();
        assert_eq!(purged, 1);

        // The recently deleted entry is retained; its source message
        // is still burned.
        assert!(state.meals.exists_by_source_any(1, 1).await.unwrap());
        assert!(!state.meals.exists_by_source_any(1, 2).await.unwrap());
    }

    #[tokio::test]
    async fn reminder_claims_each_user_once() {
        let state = AppState::fake();
        let user = state.users.get_or_create(7).await.unwrap();
        state
            .users
            .update_timezone(user.id, crate::tz::TZ_MODE_OFFSET, None, Some(0))
            .await
            .unwrap();

        let now = Utc::now();
        state
            .users
            .touch_activity(7, now - Duration::hours(10))
            .await
            .unwrap();

        let inactivity = now - Duration::hours(6);
        let cooldown = now - Duration::hours(6);

        let claimed = state
            .users
            .claim_inactive(inactivity, cooldown, now)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].external_id, 7);

        // Second run inside the cooldown claims nobody.
        let claimed = state
            .users
            .claim_inactive(inactivity, cooldown, now)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }
}
