//! Postgres implementations of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{DayTotals, MealEntry, MealNutrition, MealStore, NewMealEntry, User, UserStore};
use crate::error::AppError;

const MEAL_COLUMNS: &str = "id, user_id, chat_id, message_id, source, original_text, \
     photo_file_id, consumed_at, local_date, tz_name_snapshot, tz_offset_minutes_snapshot, \
     meal_name, calories_kcal, protein_g, carbs_g, fat_g, weight_g, volume_ml, caffeine_mg, \
     ingredients, raw_response, is_deleted, deleted_at, created_at, updated_at";

const USER_COLUMNS: &str = "id, external_id, goal, language, tz_mode, tz_name, \
     tz_offset_minutes, last_activity_at, last_reminder_at, created_at, updated_at";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_or_create(&self, external_id: i64) -> Result<User, AppError> {
        // ON CONFLICT DO NOTHING + re-select keeps this race-safe
        // without ever clobbering an existing row.
        let inserted = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (external_id)
            VALUES ($1)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(user) = inserted {
            return Ok(user);
        }

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update_goal(&self, id: Uuid, goal: &str) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET goal = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(goal)
        .fetch_optional(&self.pool)
        .await?;
        user.ok_or(AppError::NotFound)
    }

    async fn update_timezone(
        &self,
        id: Uuid,
        tz_mode: &str,
        tz_name: Option<&str>,
        tz_offset_minutes: Option<i32>,
    ) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET tz_mode = $2, tz_name = $3, tz_offset_minutes = $4, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(tz_mode)
        .bind(tz_name)
        .bind(tz_offset_minutes)
        .fetch_optional(&self.pool)
        .await?;
        user.ok_or(AppError::NotFound)
    }

    async fn update_language(&self, id: Uuid, language: &str) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET language = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(language.to_uppercase())
        .fetch_optional(&self.pool)
        .await?;
        user.ok_or(AppError::NotFound)
    }

    async fn touch_activity(&self, external_id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        // No-op when the user does not exist yet; get_or_create will
        // run later in the same interaction.
        sqlx::query("UPDATE users SET last_activity_at = $2 WHERE external_id = $1")
            .bind(external_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_inactive(
        &self,
        inactivity_cutoff: DateTime<Utc>,
        cooldown_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET last_reminder_at = $3
            WHERE tz_mode IS NOT NULL
              AND last_activity_at IS NOT NULL
              AND last_activity_at < $1
              AND (last_reminder_at IS NULL OR last_reminder_at < $2)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(inactivity_cutoff)
        .bind(cooldown_cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

#[derive(Clone)]
pub struct PgMealStore {
    pool: PgPool,
}

impl PgMealStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MealStore for PgMealStore {
    async fn create(&self, new: NewMealEntry) -> Result<MealEntry, AppError> {
        let n = new.nutrition;
        let result = sqlx::query_as::<_, MealEntry>(&format!(
            r#"
            INSERT INTO meal_entries (
                user_id, chat_id, message_id, source, original_text, photo_file_id,
                consumed_at, local_date, tz_name_snapshot, tz_offset_minutes_snapshot,
                meal_name, calories_kcal, protein_g, carbs_g, fat_g,
                weight_g, volume_ml, caffeine_mg, ingredients, raw_response
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING {MEAL_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(new.chat_id)
        .bind(new.message_id)
        .bind(&new.source)
        .bind(&new.original_text)
        .bind(&new.photo_file_id)
        .bind(new.consumed_at)
        .bind(new.local_date)
        .bind(&new.tz_name_snapshot)
        .bind(new.tz_offset_minutes_snapshot)
        .bind(&n.meal_name)
        .bind(n.calories_kcal)
        .bind(n.protein_g)
        .bind(n.carbs_g)
        .bind(n.fat_g)
        .bind(n.weight_g)
        .bind(n.volume_ml)
        .bind(n.caffeine_mg)
        .bind(&n.ingredients)
        .bind(&n.raw_response)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(entry) => Ok(entry),
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateSource),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<MealEntry>, AppError> {
        let entry = sqlx::query_as::<_, MealEntry>(&format!(
            r#"
            SELECT {MEAL_COLUMNS} FROM meal_entries
            WHERE id = $1 AND user_id = $2 AND NOT is_deleted
            "#
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn update(
        &self,
        id: Uuid,
        owner: Uuid,
        nutrition: MealNutrition,
        now: DateTime<Utc>,
    ) -> Result<MealEntry, AppError> {
        let entry = sqlx::query_as::<_, MealEntry>(&format!(
            r#"
            UPDATE meal_entries
            SET meal_name = $3, calories_kcal = $4, protein_g = $5, carbs_g = $6,
                fat_g = $7, weight_g = $8, volume_ml = $9, caffeine_mg = $10,
                ingredients = $11, raw_response = $12, updated_at = $13
            WHERE id = $1 AND user_id = $2 AND NOT is_deleted
            RETURNING {MEAL_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(&nutrition.meal_name)
        .bind(nutrition.calories_kcal)
        .bind(nutrition.protein_g)
        .bind(nutrition.carbs_g)
        .bind(nutrition.fat_g)
        .bind(nutrition.weight_g)
        .bind(nutrition.volume_ml)
        .bind(nutrition.caffeine_mg)
        .bind(&nutrition.ingredients)
        .bind(&nutrition.raw_response)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        entry.ok_or(AppError::NotFound)
    }

    async fn soft_delete(
        &self,
        id: Uuid,
        owner: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE meal_entries
            SET is_deleted = TRUE, deleted_at = $3, updated_at = $3
            WHERE id = $1 AND user_id = $2 AND NOT is_deleted
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists_by_source_any(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<bool, AppError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM meal_entries WHERE chat_id = $1 AND message_id = $2",
        )
        .bind(chat_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn exists_by_photo(&self, owner: Uuid, photo_file_id: &str) -> Result<bool, AppError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM meal_entries
            WHERE user_id = $1 AND photo_file_id = $2 AND NOT is_deleted
            LIMIT 1
            "#,
        )
        .bind(owner)
        .bind(photo_file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn list_recent(&self, owner: Uuid, limit: i64) -> Result<Vec<MealEntry>, AppError> {
        let entries = sqlx::query_as::<_, MealEntry>(&format!(
            r#"
            SELECT {MEAL_COLUMNS} FROM meal_entries
            WHERE user_id = $1 AND NOT is_deleted
            ORDER BY consumed_at DESC
            LIMIT $2
            "#
        ))
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result =
            sqlx::query("DELETE FROM meal_entries WHERE is_deleted AND deleted_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn totals_by_local_date(
        &self,
        owner: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayTotals>, AppError> {
        let totals = sqlx::query_as::<_, DayTotals>(
            r#"
            SELECT local_date,
                   COALESCE(SUM(calories_kcal), 0)::BIGINT AS calories_kcal,
                   COALESCE(SUM(protein_g), 0)::DOUBLE PRECISION AS protein_g,
                   COALESCE(SUM(carbs_g), 0)::DOUBLE PRECISION AS carbs_g,
                   COALESCE(SUM(fat_g), 0)::DOUBLE PRECISION AS fat_g
            FROM meal_entries
            WHERE user_id = $1 AND local_date >= $2 AND local_date <= $3 AND NOT is_deleted
            GROUP BY local_date
            "#,
        )
        .bind(owner)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(totals)
    }
}
