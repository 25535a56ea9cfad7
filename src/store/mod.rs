//! System of record: users and meal entries.
//!
//! Two trait seams (`UserStore`, `MealStore`) with a Postgres
//! implementation and an in-memory one for tests. Every meal query is
//! active-only by construction; the sole including-deleted lookup is
//! the separately named `exists_by_source_any`, so a call site cannot
//! reach the wrong visibility by passing the wrong flag.

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::{PgMealStore, PgUserStore};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    /// Stable identifier assigned by the chat transport.
    pub external_id: i64,
    pub goal: Option<String>,
    pub language: String,
    pub tz_mode: Option<String>,
    pub tz_name: Option<String>,
    pub tz_offset_minutes: Option<i32>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MealEntry {
    pub id: Uuid,
    pub user_id: Uuid,

    // Idempotency anchor: one entry per source message, ever.
    pub chat_id: i64,
    pub message_id: i64,

    pub source: String,
    pub original_text: Option<String>,
    pub photo_file_id: Option<String>,

    pub consumed_at: DateTime<Utc>,
    /// Computed once at creation from `consumed_at` and the timezone
    /// snapshot below; immutable thereafter (no re-bucketing).
    pub local_date: NaiveDate,
    pub tz_name_snapshot: Option<String>,
    pub tz_offset_minutes_snapshot: Option<i32>,

    pub meal_name: String,
    pub calories_kcal: i32,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub weight_g: Option<i32>,
    pub volume_ml: Option<i32>,
    pub caffeine_mg: Option<i32>,
    pub ingredients: serde_json::Value,
    pub raw_response: serde_json::Value,

    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full nutrition payload. Edits replace it wholesale — partial field
/// patches are not representable.
#[derive(Debug, Clone)]
pub struct MealNutrition {
    pub meal_name: String,
    pub calories_kcal: i32,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub weight_g: Option<i32>,
    pub volume_ml: Option<i32>,
    pub caffeine_mg: Option<i32>,
    pub ingredients: serde_json::Value,
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewMealEntry {
    pub user_id: Uuid,
    pub chat_id: i64,
    pub message_id: i64,
    pub source: String,
    pub original_text: Option<String>,
    pub photo_file_id: Option<String>,
    pub consumed_at: DateTime<Utc>,
    pub local_date: NaiveDate,
    pub tz_name_snapshot: Option<String>,
    pub tz_offset_minutes_snapshot: Option<i32>,
    pub nutrition: MealNutrition,
}

/// Grouped sums for one local date, feeding the aggregation engine.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DayTotals {
    pub local_date: NaiveDate,
    pub calories_kcal: i64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Race-safe get-or-create by external id.
    async fn get_or_create(&self, external_id: i64) -> Result<User, AppError>;

    async fn update_goal(&self, id: Uuid, goal: &str) -> Result<User, AppError>;

    async fn update_timezone(
        &self,
        id: Uuid,
        tz_mode: &str,
        tz_name: Option<&str>,
        tz_offset_minutes: Option<i32>,
    ) -> Result<User, AppError>;

    async fn update_language(&self, id: Uuid, language: &str) -> Result<User, AppError>;

    /// Best-effort activity stamp. Callers log and ignore the error so
    /// activity tracking can never abort a meal save/edit/delete.
    async fn touch_activity(&self, external_id: i64, at: DateTime<Utc>) -> Result<(), AppError>;

    /// Atomically claim users eligible for an inactivity reminder:
    /// onboarded, last active before `inactivity_cutoff`, last reminded
    /// before `cooldown_cutoff` (or never). Claiming stamps
    /// `last_reminder_at = now`, so concurrent trigger calls cannot
    /// claim the same user twice.
    async fn claim_inactive(
        &self,
        inactivity_cutoff: DateTime<Utc>,
        cooldown_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<User>, AppError>;
}

#[async_trait]
pub trait MealStore: Send + Sync {
    /// Insert a new entry. The (chat_id, message_id) uniqueness
    /// constraint is the arbiter of duplicate-write races; a conflict
    /// surfaces as [`AppError::DuplicateSource`].
    async fn create(&self, new: NewMealEntry) -> Result<MealEntry, AppError>;

    /// Active rows only; a row owned by someone else is `None`.
    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<MealEntry>, AppError>;

    /// In-place replacement of the nutrition payload. Same row, same
    /// id. `NotFound` if absent, foreign, or soft-deleted.
    async fn update(
        &self,
        id: Uuid,
        owner: Uuid,
        nutrition: MealNutrition,
        now: DateTime<Utc>,
    ) -> Result<MealEntry, AppError>;

    /// Idempotent soft delete; returns whether a row actually changed.
    async fn soft_delete(&self, id: Uuid, owner: Uuid, at: DateTime<Utc>)
        -> Result<bool, AppError>;

    /// Idempotency admission check. Sees soft-deleted rows too: an
    /// already-processed source message must never produce a second
    /// entry, even after the first was deleted.
    async fn exists_by_source_any(&self, chat_id: i64, message_id: i64)
        -> Result<bool, AppError>;

    /// Whether an active entry of this user already references the
    /// given transport photo id.
    async fn exists_by_photo(&self, owner: Uuid, photo_file_id: &str) -> Result<bool, AppError>;

    async fn list_recent(&self, owner: Uuid, limit: i64) -> Result<Vec<MealEntry>, AppError>;

    /// Physically remove rows soft-deleted before `cutoff`. Irreversible.
    async fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;

    /// Active-entry sums grouped by local date over `[from, to]`.
    /// Dates without entries are absent; the aggregation engine
    /// zero-fills.
    async fn totals_by_local_date(
        &self,
        owner: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayTotals>, AppError>;
}
