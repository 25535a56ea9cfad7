//! Submission flow and lifecycle guard.
//!
//! Admission order for a new submission: precheck → idempotency →
//! rate limit → single-flight permit → AI analysis (with typing
//! heartbeat). A savable estimate becomes a per-user draft; confirming
//! the draft is what writes to the store. Edits re-run analysis and
//! replace the nutrition payload of the same row; deletes are soft.
//!
//! The single-flight permit is an RAII value held across the analysis
//! await; every exit path releases the user's slot.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::drafts::Draft;
use crate::ai::{sanity_check, AnalysisAction, NutritionAnalysis};
use crate::error::{AppError, WindowKind};
use crate::messages;
use crate::precheck::{check_message_type, check_photo_size, check_text, Precheck};
use crate::reports::{today_stats, DayStats};
use crate::state::AppState;
use crate::store::{MealEntry, MealNutrition, NewMealEntry, User};
use crate::tz::TzPref;

const SOURCE_TEXT: &str = "text";
const SOURCE_PHOTO: &str = "photo";

#[derive(Debug)]
pub enum SubmissionInput {
    Text {
        text: String,
    },
    Photo {
        payload: Bytes,
        file_id: String,
        caption: Option<String>,
    },
}

#[derive(Debug)]
pub enum SubmissionOutcome {
    /// Terminal: precheck, AI rejection, or sanity failure. The message
    /// is the exact text to surface.
    Rejected { message: String },
    /// The source message was already processed; a no-op.
    AlreadySaved,
    /// A savable estimate is waiting for the user's confirmation.
    Drafted {
        analysis: NutritionAnalysis,
        expires_in: Duration,
    },
}

#[derive(Debug)]
pub enum ConfirmOutcome {
    Saved { entry: MealEntry, today: DayStats },
    /// The draft's source message raced another save; treated as done.
    AlreadySaved,
    /// No live draft (never existed, expired, or already consumed).
    NoDraft,
}

/// Submit a new meal description for analysis.
pub async fn submit(
    state: &AppState,
    external_id: i64,
    chat_id: i64,
    message_id: i64,
    input: SubmissionInput,
    on_heartbeat: impl Fn() + Send + 'static,
) -> Result<SubmissionOutcome, AppError> {
    let user = state.users.get_or_create(external_id).await?;
    touch_activity(state, external_id).await;

    // Cheap gates before any quota is spent.
    let (has_text, has_photo) = match &input {
        SubmissionInput::Text { text } => (!text.trim().is_empty(), false),
        SubmissionInput::Photo { .. } => (false, true),
    };
    if let Precheck::Reject(message) = check_message_type(has_text, has_photo) {
        return Ok(SubmissionOutcome::Rejected {
            message: message.to_string(),
        });
    }

    let precheck = match &input {
        SubmissionInput::Text { text } => check_text(text, false),
        SubmissionInput::Photo {
            payload, caption, ..
        } => {
            let size = check_photo_size(payload.len(), state.config.limits.max_photo_bytes);
            match (&size, caption) {
                (Precheck::Pass, Some(caption)) => check_text(caption, true),
                _ => size,
            }
        }
    };
    if let Precheck::Reject(message) = precheck {
        return Ok(SubmissionOutcome::Rejected {
            message: message.to_string(),
        });
    }

    // Idempotency admission: the same inbound message never produces a
    // second entry, even if the first was soft-deleted since.
    if state.meals.exists_by_source_any(chat_id, message_id).await? {
        return Ok(SubmissionOutcome::AlreadySaved);
    }
    if let SubmissionInput::Photo { file_id, .. } = &input {
        if !state.config.limits.allow_repeat_photos
            && state.meals.exists_by_photo(user.id, file_id).await?
        {
            return Ok(SubmissionOutcome::AlreadySaved);
        }
    }

    if !state.limiter.check(external_id) {
        return Err(AppError::Throttled);
    }
    let Some(permit) = state.guard.try_acquire(external_id) else {
        return Err(AppError::Throttled);
    };

    let analysis = {
        let _permit = permit;
        let lang = user.language.clone();
        match &input {
            SubmissionInput::Text { text } => {
                with_heartbeat(on_heartbeat, state.analyzer.analyze_text(text, &lang)).await
            }
            SubmissionInput::Photo {
                payload, caption, ..
            } => {
                with_heartbeat(
                    on_heartbeat,
                    state
                        .analyzer
                        .analyze_photo(payload.clone(), caption.as_deref(), &lang),
                )
                .await
            }
        }
    };

    if let Some(message) = rejection_message(&analysis) {
        return Ok(SubmissionOutcome::Rejected { message });
    }

    let (source, original_text, photo_file_id) = match input {
        SubmissionInput::Text { text } => (SOURCE_TEXT, Some(text), None),
        SubmissionInput::Photo {
            file_id, caption, ..
        } => (SOURCE_PHOTO, caption, Some(file_id)),
    };
    state.drafts.put(
        external_id,
        Draft {
            analysis: analysis.clone(),
            source: source.to_string(),
            original_text,
            photo_file_id,
            chat_id,
            message_id,
            edit_of: None,
            expires_at: std::time::Instant::now(),
        },
    );

    Ok(SubmissionOutcome::Drafted {
        analysis,
        expires_in: state.drafts.ttl(),
    })
}

/// Submit corrected text for a saved entry. On success the fresh
/// analysis becomes a draft tied to the entry id; confirming it
/// replaces the row's nutrition payload in place.
pub async fn submit_edit(
    state: &AppState,
    external_id: i64,
    meal_id: Uuid,
    text: String,
    on_heartbeat: impl Fn() + Send + 'static,
) -> Result<SubmissionOutcome, AppError> {
    let user = state.users.get_or_create(external_id).await?;
    touch_activity(state, external_id).await;

    let entry = state
        .meals
        .get_by_id(meal_id, user.id)
        .await?
        .ok_or(AppError::NotFound)?;
    check_window(
        entry.consumed_at,
        Utc::now(),
        state.config.limits.edit_window_hours,
        WindowKind::Edit,
    )?;

    if let Precheck::Reject(message) = check_text(&text, false) {
        return Ok(SubmissionOutcome::Rejected {
            message: message.to_string(),
        });
    }

    if !state.limiter.check(external_id) {
        return Err(AppError::Throttled);
    }
    let Some(permit) = state.guard.try_acquire(external_id) else {
        return Err(AppError::Throttled);
    };

    let analysis = {
        let _permit = permit;
        with_heartbeat(on_heartbeat, state.analyzer.analyze_text(&text, &user.language)).await
    };

    if let Some(message) = rejection_message(&analysis) {
        return Ok(SubmissionOutcome::Rejected { message });
    }

    state.drafts.put(
        external_id,
        Draft {
            analysis: analysis.clone(),
            source: SOURCE_TEXT.to_string(),
            original_text: Some(text),
            photo_file_id: None,
            chat_id: entry.chat_id,
            message_id: entry.message_id,
            edit_of: Some(meal_id),
            expires_at: std::time::Instant::now(),
        },
    );

    Ok(SubmissionOutcome::Drafted {
        analysis,
        expires_in: state.drafts.ttl(),
    })
}

/// Confirm the user's live draft: create the entry (or update the one
/// being edited) and return it with today's totals.
pub async fn confirm_draft(
    state: &AppState,
    external_id: i64,
) -> Result<ConfirmOutcome, AppError> {
    let Some(draft) = state.drafts.take(external_id) else {
        return Ok(ConfirmOutcome::NoDraft);
    };

    let user = state.users.get_or_create(external_id).await?;
    touch_activity(state, external_id).await;

    let tz = user_tz(&user)?;
    let now = Utc::now();
    let nutrition = nutrition_from_analysis(&draft.analysis);

    let entry = match draft.edit_of {
        Some(meal_id) => {
            // The user may have sat on the draft; re-check the window
            // against the original consumption time.
            let existing = state
                .meals
                .get_by_id(meal_id, user.id)
                .await?
                .ok_or(AppError::NotFound)?;
            check_window(
                existing.consumed_at,
                now,
                state.config.limits.edit_window_hours,
                WindowKind::Edit,
            )?;
            state.meals.update(meal_id, user.id, nutrition, now).await?
        }
        None => {
            // local_date and the timezone snapshot are computed here,
            // once, from the user's current preference; they are never
            // revisited when the preference changes later.
            let new = NewMealEntry {
                user_id: user.id,
                chat_id: draft.chat_id,
                message_id: draft.message_id,
                source: draft.source.clone(),
                original_text: draft.original_text.clone(),
                photo_file_id: draft.photo_file_id.clone(),
                consumed_at: now,
                local_date: tz.local_date(now),
                tz_name_snapshot: user.tz_name.clone(),
                tz_offset_minutes_snapshot: user.tz_offset_minutes,
                nutrition,
            };
            match state.meals.create(new).await {
                Ok(entry) => entry,
                // The constraint is the final arbiter of duplicate
                // races; losing it means the work is already done.
                Err(AppError::DuplicateSource) => return Ok(ConfirmOutcome::AlreadySaved),
                Err(e) => return Err(e),
            }
        }
    };

    let today = today_stats(state.meals.as_ref(), user.id, tz.today(now)).await?;
    Ok(ConfirmOutcome::Saved { entry, today })
}

/// Discard the user's live draft; returns whether one existed.
pub async fn discard_draft(state: &AppState, external_id: i64) -> bool {
    state.drafts.discard(external_id)
}

/// Soft-delete a saved entry (within the delete window) and return
/// today's totals after the removal.
pub async fn delete_entry(
    state: &AppState,
    external_id: i64,
    meal_id: Uuid,
) -> Result<DayStats, AppError> {
    let user = state.users.get_or_create(external_id).await?;
    touch_activity(state, external_id).await;

    let entry = state
        .meals
        .get_by_id(meal_id, user.id)
        .await?
        .ok_or(AppError::NotFound)?;
    let now = Utc::now();
    check_window(
        entry.consumed_at,
        now,
        state.config.limits.delete_window_hours,
        WindowKind::Delete,
    )?;

    if !state.meals.soft_delete(meal_id, user.id, now).await? {
        return Err(AppError::NotFound);
    }
    // A pending edit of this entry can no longer be confirmed.
    state
        .drafts
        .discard_matching(external_id, |d| d.edit_of == Some(meal_id));

    let tz = user_tz(&user)?;
    today_stats(state.meals.as_ref(), user.id, tz.today(now)).await
}

/// Most recent active entries for the user.
pub async fn history(
    state: &AppState,
    external_id: i64,
    limit: i64,
) -> Result<Vec<MealEntry>, AppError> {
    let user = state.users.get_or_create(external_id).await?;
    touch_activity(state, external_id).await;
    state.meals.list_recent(user.id, limit).await
}

// --- helpers ---

fn user_tz(user: &User) -> Result<TzPref, AppError> {
    TzPref::from_user(
        user.tz_mode.as_deref(),
        user.tz_name.as_deref(),
        user.tz_offset_minutes,
    )
}

/// Activity tracking never aborts the primary operation.
async fn touch_activity(state: &AppState, external_id: i64) {
    if let Err(e) = state.users.touch_activity(external_id, Utc::now()).await {
        tracing::warn!(external_id, error = %e, "touch_activity failed");
    }
}

fn check_window(
    consumed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    hours: i64,
    kind: WindowKind,
) -> Result<(), AppError> {
    if now - consumed_at > chrono::Duration::hours(hours) {
        Err(AppError::WindowExpired { kind, hours })
    } else {
        Ok(())
    }
}

/// Map an analysis to its terminal rejection message, if any. A save
/// action can still be rejected here by the sanity check.
fn rejection_message(analysis: &NutritionAnalysis) -> Option<String> {
    match analysis.action {
        AnalysisAction::RejectUnrecognized => Some(messages::UNRECOGNIZED.to_string()),
        AnalysisAction::RejectNoCalories
        | AnalysisAction::RejectNotFood
        | AnalysisAction::RejectInsufficientDetail => Some(
            analysis
                .user_message
                .clone()
                .unwrap_or_else(|| messages::UNRECOGNIZED.to_string()),
        ),
        AnalysisAction::Save => {
            if let Some(reason) = sanity_check(analysis) {
                tracing::warn!(reason, "analysis failed sanity check");
                Some(messages::SANITY_FAIL.to_string())
            } else {
                None
            }
        }
    }
}

fn nutrition_from_analysis(analysis: &NutritionAnalysis) -> MealNutrition {
    MealNutrition {
        meal_name: analysis
            .meal_name
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        calories_kcal: analysis.calories_kcal.unwrap_or(0),
        protein_g: analysis.protein_g.unwrap_or(0.0),
        carbs_g: analysis.carbs_g.unwrap_or(0.0),
        fat_g: analysis.fat_g.unwrap_or(0.0),
        weight_g: analysis.weight_g,
        volume_ml: analysis.volume_ml,
        caffeine_mg: analysis.caffeine_mg,
        ingredients: serde_json::to_value(&analysis.likely_ingredients)
            .unwrap_or(serde_json::Value::Null),
        raw_response: serde_json::to_value(analysis).unwrap_or(serde_json::Value::Null),
    }
}

/// Run `analysis` while emitting a heartbeat every 4 seconds, starting
/// immediately. The ticker is aborted when this future resolves OR is
/// dropped mid-flight (axum drops handler futures on client
/// disconnect), so an abandoned request cannot leak a ticking task.
async fn with_heartbeat<F, Fut>(on_tick: F, analysis: Fut) -> NutritionAnalysis
where
    F: Fn() + Send + 'static,
    Fut: Future<Output = NutritionAnalysis>,
{
    struct AbortOnDrop(tokio::task::JoinHandle<()>);
    impl Drop for AbortOnDrop {
        fn drop(&mut self) {
            self.0.abort();
        }
    }

    let _heartbeat = AbortOnDrop(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(4));
        loop {
            interval.tick().await;
            on_tick();
        }
    }));
    analysis.await
}
