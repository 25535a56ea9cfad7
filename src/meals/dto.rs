use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ai::NutritionAnalysis;
use crate::reports::DayStats;
use crate::store::MealEntry;

#[derive(Debug, Deserialize)]
pub struct TextSubmission {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct EditSubmission {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<NutritionAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<MealView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub today: Option<DayStats>,
}

#[derive(Debug, Serialize)]
pub struct DiscardResponse {
    pub discarded: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: &'static str,
    pub today: DayStats,
}

#[derive(Debug, Serialize)]
pub struct MealView {
    pub id: Uuid,
    pub meal_name: String,
    pub calories_kcal: i32,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_g: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_ml: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caffeine_mg: Option<i32>,
    pub source: String,
    pub consumed_at: DateTime<Utc>,
    pub local_date: NaiveDate,
}

impl From<MealEntry> for MealView {
    fn from(e: MealEntry) -> Self {
        Self {
            id: e.id,
            meal_name: e.meal_name,
            calories_kcal: e.calories_kcal,
            protein_g: e.protein_g,
            carbs_g: e.carbs_g,
            fat_g: e.fat_g,
            weight_g: e.weight_g,
            volume_ml: e.volume_ml,
            caffeine_mg: e.caffeine_mg,
            source: e.source,
            consumed_at: e.consumed_at,
            local_date: e.local_date,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}
