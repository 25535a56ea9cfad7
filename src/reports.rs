//! Report aggregations over the entry store.
//!
//! All three shapes are zero-filled: a date or week with no entries
//! contributes an all-zero row, never a gap. Soft-deleted entries are
//! excluded by the store query itself.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::MealStore;
use crate::tz::{last_4_week_ranges, last_n_days, TzPref};
use crate::users::ExternalUser;

/// Nutrition totals for a single local date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayStats {
    pub date: NaiveDate,
    pub calories_kcal: i64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

impl DayStats {
    fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            calories_kcal: 0,
            protein_g: 0.0,
            carbs_g: 0.0,
            fat_g: 0.0,
        }
    }
}

/// Per-day averages for one Mon–Sun week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekAvgStats {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub avg_calories_kcal: f64,
    pub avg_protein_g: f64,
    pub avg_carbs_g: f64,
    pub avg_fat_g: f64,
}

/// Totals for one local date; zeros when nothing was logged.
pub async fn today_stats(
    store: &dyn MealStore,
    user_id: Uuid,
    date: NaiveDate,
) -> Result<DayStats, AppError> {
    let mut rows = range_stats(store, user_id, &[date]).await?;
    Ok(rows.pop().unwrap_or_else(|| DayStats::zero(date)))
}

/// One row per requested date, in input order, zero-filled.
pub async fn range_stats(
    store: &dyn MealStore,
    user_id: Uuid,
    dates: &[NaiveDate],
) -> Result<Vec<DayStats>, AppError> {
    let (Some(&min), Some(&max)) = (dates.iter().min(), dates.iter().max()) else {
        return Ok(Vec::new());
    };
    let totals = store.totals_by_local_date(user_id, min, max).await?;
    let by_date: HashMap<NaiveDate, DayStats> = totals
        .into_iter()
        .map(|t| {
            (
                t.local_date,
                DayStats {
                    date: t.local_date,
                    calories_kcal: t.calories_kcal,
                    protein_g: t.protein_g,
                    carbs_g: t.carbs_g,
                    fat_g: t.fat_g,
                },
            )
        })
        .collect();

    Ok(dates
        .iter()
        .map(|d| by_date.get(d).cloned().unwrap_or_else(|| DayStats::zero(*d)))
        .collect())
}

/// Per-day averages for each (monday, sunday) range, in input order.
///
/// The divisor is exactly 7, not the count of days with data: a week
/// with partial logging reads proportionally lower, never inflated.
pub async fn four_week_stats(
    store: &dyn MealStore,
    user_id: Uuid,
    week_ranges: &[(NaiveDate, NaiveDate)],
) -> Result<Vec<WeekAvgStats>, AppError> {
    let mut results = Vec::with_capacity(week_ranges.len());
    for &(monday, sunday) in week_ranges {
        let totals = store.totals_by_local_date(user_id, monday, sunday).await?;
        let mut kcal: i64 = 0;
        let (mut protein, mut carbs, mut fat) = (0.0f64, 0.0f64, 0.0f64);
        for t in totals {
            kcal += t.calories_kcal;
            protein += t.protein_g;
            carbs += t.carbs_g;
            fat += t.fat_g;
        }
        results.push(WeekAvgStats {
            week_start: monday,
            week_end: sunday,
            avg_calories_kcal: kcal as f64 / 7.0,
            avg_protein_g: protein / 7.0,
            avg_carbs_g: carbs / 7.0,
            avg_fat_g: fat / 7.0,
        });
    }
    Ok(results)
}

// --- HTTP surface ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats/today", get(get_today))
        .route("/stats/weekly", get(get_weekly))
        .route("/stats/4weeks", get(get_four_weeks))
}

async fn resolve_today(state: &AppState, external_id: i64) -> Result<(Uuid, NaiveDate), AppError> {
    let user = state.users.get_or_create(external_id).await?;
    let tz = TzPref::from_user(
        user.tz_mode.as_deref(),
        user.tz_name.as_deref(),
        user.tz_offset_minutes,
    )?;
    Ok((user.id, tz.today(Utc::now())))
}

#[tracing::instrument(skip(state))]
async fn get_today(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
) -> Result<Json<DayStats>, AppError> {
    let (user_id, today) = resolve_today(&state, external_id).await?;
    let stats = today_stats(state.meals.as_ref(), user_id, today).await?;
    Ok(Json(stats))
}

#[tracing::instrument(skip(state))]
async fn get_weekly(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
) -> Result<Json<Vec<DayStats>>, AppError> {
    let (user_id, today) = resolve_today(&state, external_id).await?;
    let dates = last_n_days(today, 7);
    let stats = range_stats(state.meals.as_ref(), user_id, &dates).await?;
    Ok(Json(stats))
}

#[tracing::instrument(skip(state))]
async fn get_four_weeks(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
) -> Result<Json<Vec<WeekAvgStats>>, AppError> {
    let (user_id, today) = resolve_today(&state, external_id).await?;
    let ranges = last_4_week_ranges(today);
    let stats = four_week_stats(state.meals.as_ref(), user_id, &ranges).await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MealNutrition, MemStore, NewMealEntry};
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seed(
        store: &MemStore,
        user: Uuid,
        message_id: i64,
        day: NaiveDate,
        kcal: i32,
        protein: f64,
    ) -> crate::store::MealEntry {
        store
            .create(NewMealEntry {
                user_id: user,
                chat_id: 1,
                message_id,
                source: "text".into(),
                original_text: None,
                photo_file_id: None,
                consumed_at: Utc.with_ymd_and_hms(2024, 6, 19, 12, 0, 0).unwrap(),
                local_date: day,
                tz_name_snapshot: None,
                tz_offset_minutes_snapshot: Some(0),
                nutrition: MealNutrition {
                    meal_name: "meal".into(),
                    calories_kcal: kcal,
                    protein_g: protein,
                    carbs_g: 0.0,
                    fat_g: 0.0,
                    weight_g: None,
                    volume_ml: None,
                    caffeine_mg: None,
                    ingredients: serde_json::json!([]),
                    raw_response: serde_json::json!({}),
                },
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn today_sums_only_that_date() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        seed(&store, user, 1, date(2024, 6, 19), 400, 30.0).await;
        seed(&store, user, 2, date(2024, 6, 19), 250, 12.5).await;
        seed(&store, user, 3, date(2024, 6, 18), 900, 50.0).await;

        let stats = today_stats(&store, user, date(2024, 6, 19)).await.unwrap();
        assert_eq!(stats.calories_kcal, 650);
        assert_eq!(stats.protein_g, 42.5);
    }

    #[tokio::test]
    async fn today_is_zero_without_entries() {
        let store = MemStore::new();
        let stats = today_stats(&store, Uuid::new_v4(), date(2024, 6, 19))
            .await
            .unwrap();
        assert_eq!(stats, DayStats::zero(date(2024, 6, 19)));
    }

    #[tokio::test]
    async fn range_zero_fills_in_input_order() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let d1 = date(2024, 6, 19);
        let d2 = date(2024, 6, 18);
        let d3 = date(2024, 6, 17);
        seed(&store, user, 1, d2, 500, 10.0).await;

        let rows = range_stats(&store, user, &[d1, d2, d3]).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], DayStats::zero(d1));
        assert_eq!(rows[1].calories_kcal, 500);
        assert_eq!(rows[2], DayStats::zero(d3));
    }

    #[tokio::test]
    async fn range_excludes_soft_deleted() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let d = date(2024, 6, 19);
        let entry = seed(&store, user, 1, d, 500, 10.0).await;
        seed(&store, user, 2, d, 200, 5.0).await;

        store.soft_delete(entry.id, user, Utc::now()).await.unwrap();
        let stats = today_stats(&store, user, d).await.unwrap();
        assert_eq!(stats.calories_kcal, 200);
        // The deleted entry still blocks its source message.
        assert!(store.exists_by_source_any(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn weekly_average_divides_by_seven() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        // Week Mon 2024-06-17 .. Sun 2024-06-23, single 700 kcal entry.
        seed(&store, user, 1, date(2024, 6, 19), 700, 7.0).await;

        let weeks = vec![(date(2024, 6, 17), date(2024, 6, 23))];
        let stats = four_week_stats(&store, user, &weeks).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].avg_calories_kcal, 100.0);
        assert_eq!(stats[0].avg_protein_g, 1.0);
    }

    #[tokio::test]
    async fn four_weeks_zero_filled_in_order() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        seed(&store, user, 1, date(2024, 6, 19), 1400, 0.0).await;

        let ranges = crate::tz::last_4_week_ranges(date(2024, 6, 19));
        let stats = four_week_stats(&store, user, &ranges).await.unwrap();
        assert_eq!(stats.len(), 4);
        assert_eq!(stats[0].avg_calories_kcal, 200.0);
        for week in &stats[1..] {
            assert_eq!(week.avg_calories_kcal, 0.0);
        }
        // Output order matches input order (newest first).
        assert_eq!(stats[0].week_start, ranges[0].0);
        assert_eq!(stats[3].week_end, ranges[3].1);
    }
}
