//! In-memory store used by `AppState::fake()` and unit tests.
//!
//! Mirrors the Postgres semantics, including the uniqueness of
//! (chat_id, message_id) across soft-deleted rows.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::{DayTotals, MealEntry, MealNutrition, MealStore, NewMealEntry, User, UserStore};
use crate::error::AppError;

#[derive(Default)]
pub struct MemStore {
    users: Mutex<Vec<User>>,
    meals: Mutex<Vec<MealEntry>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemStore {
    async fn get_or_create(&self, external_id: i64) -> Result<User, AppError> {
        let mut users = self.users.lock().expect("users lock");
        if let Some(user) = users.iter().find(|u| u.external_id == external_id) {
            return Ok(user.clone());
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            external_id,
            goal: None,
            language: "EN".into(),
            tz_mode: None,
            tz_name: None,
            tz_offset_minutes: None,
            last_activity_at: None,
            last_reminder_at: None,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn update_goal(&self, id: Uuid, goal: &str) -> Result<User, AppError> {
        let mut users = self.users.lock().expect("users lock");
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::NotFound)?;
        user.goal = Some(goal.to_string());
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn update_timezone(
        &self,
        id: Uuid,
        tz_mode: &str,
        tz_name: Option<&str>,
        tz_offset_minutes: Option<i32>,
    ) -> Result<User, AppError> {
        let mut users = self.users.lock().expect("users lock");
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::NotFound)?;
        user.tz_mode = Some(tz_mode.to_string());
        user.tz_name = tz_name.map(str::to_string);
        user.tz_offset_minutes = tz_offset_minutes;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn update_language(&self, id: Uuid, language: &str) -> Result<User, AppError> {
        let mut users = self.users.lock().expect("users lock");
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::NotFound)?;
        user.language = language.to_uppercase();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn touch_activity(&self, external_id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut users = self.users.lock().expect("users lock");
        if let Some(user) = users.iter_mut().find(|u| u.external_id == external_id) {
            user.last_activity_at = Some(at);
        }
        Ok(())
    }

    async fn claim_inactive(
        &self,
        inactivity_cutoff: DateTime<Utc>,
        cooldown_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<User>, AppError> {
        let mut users = self.users.lock().expect("users lock");
        let mut claimed = Vec::new();
        for user in users.iter_mut() {
            let inactive = user
                .last_activity_at
                .is_some_and(|at| at < inactivity_cutoff);
            let cooled_down = user
                .last_reminder_at
                .map_or(true, |at| at < cooldown_cutoff);
            if user.tz_mode.is_some() && inactive && cooled_down {
                user.last_reminder_at = Some(now);
                claimed.push(user.clone());
            }
        }
        Ok(claimed)
    }
}

fn apply_nutrition(entry: &mut MealEntry, n: MealNutrition) {
    entry.meal_name = n.meal_name;
    entry.calories_kcal = n.calories_kcal;
    entry.protein_g = n.protein_g;
    entry.carbs_g = n.carbs_g;
    entry.fat_g = n.fat_g;
    entry.weight_g = n.weight_g;
    entry.volume_ml = n.volume_ml;
    entry.caffeine_mg = n.caffeine_mg;
    entry.ingredients = n.ingredients;
    entry.raw_response = n.raw_response;
}

#[async_trait]
impl MealStore for MemStore {
    async fn create(&self, new: NewMealEntry) -> Result<MealEntry, AppError> {
        let mut meals = self.meals.lock().expect("meals lock");
        if meals
            .iter()
            .any(|m| m.chat_id == new.chat_id && m.message_id == new.message_id)
        {
            return Err(AppError::DuplicateSource);
        }
        let now = Utc::now();
        let mut entry = MealEntry {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            chat_id: new.chat_id,
            message_id: new.message_id,
            source: new.source,
            original_text: new.original_text,
            photo_file_id: new.photo_file_id,
            consumed_at: new.consumed_at,
            local_date: new.local_date,
            tz_name_snapshot: new.tz_name_snapshot,
            tz_offset_minutes_snapshot: new.tz_offset_minutes_snapshot,
            meal_name: String::new(),
            calories_kcal: 0,
            protein_g: 0.0,
            carbs_g: 0.0,
            fat_g: 0.0,
            weight_g: None,
            volume_ml: None,
            caffeine_mg: None,
            ingredients: serde_json::Value::Null,
            raw_response: serde_json::Value::Null,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        apply_nutrition(&mut entry, new.nutrition);
        meals.push(entry.clone());
        Ok(entry)
    }

    async fn get_by_id(&self, id: Uuid, owner: Uuid) -> Result<Option<MealEntry>, AppError> {
        let meals = self.meals.lock().expect("meals lock");
        Ok(meals
            .iter()
            .find(|m| m.id == id && m.user_id == owner && !m.is_deleted)
            .cloned())
    }

    async fn update(
        &self,
        id: Uuid,
        owner: Uuid,
        nutrition: MealNutrition,
        now: DateTime<Utc>,
    ) -> Result<MealEntry, AppError> {
        let mut meals = self.meals.lock().expect("meals lock");
        let entry = meals
            .iter_mut()
            .find(|m| m.id == id && m.user_id == owner && !m.is_deleted)
            .ok_or(AppError::NotFound)?;
        apply_nutrition(entry, nutrition);
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn soft_delete(
        &self,
        id: Uuid,
        owner: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut meals = self.meals.lock().expect("meals lock");
        match meals
            .iter_mut()
            .find(|m| m.id == id && m.user_id == owner && !m.is_deleted)
        {
            Some(entry) => {
                entry.is_deleted = true;
                entry.deleted_at = Some(at);
                entry.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exists_by_source_any(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<bool, AppError> {
        let meals = self.meals.lock().expect("meals lock");
        Ok(meals
            .iter()
            .any(|m| m.chat_id == chat_id && m.message_id == message_id))
    }

    async fn exists_by_photo(&self, owner: Uuid, photo_file_id: &str) -> Result<bool, AppError> {
        let meals = self.meals.lock().expect("meals lock");
        Ok(meals.iter().any(|m| {
            m.user_id == owner && !m.is_deleted && m.photo_file_id.as_deref() == Some(photo_file_id)
        }))
    }

    async fn list_recent(&self, owner: Uuid, limit: i64) -> Result<Vec<MealEntry>, AppError> {
        let meals = self.meals.lock().expect("meals lock");
        let mut entries: Vec<MealEntry> = meals
            .iter()
            .filter(|m| m.user_id == owner && !m.is_deleted)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.consumed_at.cmp(&a.consumed_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    async fn purge_deleted_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut meals = self.meals.lock().expect("meals lock");
        let before = meals.len();
        meals.retain(|m| !(m.is_deleted && m.deleted_at.is_some_and(|at| at < cutoff)));
        Ok((before - meals.len()) as u64)
    }

    async fn totals_by_local_date(
        &self,
        owner: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayTotals>, AppError> {
        let meals = self.meals.lock().expect("meals lock");
        let mut by_date: std::collections::BTreeMap<NaiveDate, DayTotals> =
            std::collections::BTreeMap::new();
        for m in meals.iter().filter(|m| {
            m.user_id == owner && !m.is_deleted && m.local_date >= from && m.local_date <= to
        }) {
            let totals = by_date.entry(m.local_date).or_insert_with(|| DayTotals {
                local_date: m.local_date,
                calories_kcal: 0,
                protein_g: 0.0,
                carbs_g: 0.0,
                fat_g: 0.0,
            });
            totals.calories_kcal += i64::from(m.calories_kcal);
            totals.protein_g += m.protein_g;
            totals.carbs_g += m.carbs_g;
            totals.fat_g += m.fat_g;
        }
        Ok(by_date.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn nutrition(kcal: i32) -> MealNutrition {
        MealNutrition {
            meal_name: "Test meal".into(),
            calories_kcal: kcal,
            protein_g: 10.0,
            carbs_g: 20.0,
            fat_g: 5.0,
            weight_g: None,
            volume_ml: None,
            caffeine_mg: None,
            ingredients: serde_json::json!([]),
            raw_response: serde_json::json!({}),
        }
    }

    fn new_entry(user_id: Uuid, chat_id: i64, message_id: i64, kcal: i32) -> NewMealEntry {
        NewMealEntry {
            user_id,
            chat_id,
            message_id,
            source: "text".into(),
            original_text: Some("test".into()),
            photo_file_id: None,
            consumed_at: Utc::now(),
            local_date: date(2024, 6, 19),
            tz_name_snapshot: None,
            tz_offset_minutes_snapshot: Some(0),
            nutrition: nutrition(kcal),
        }
    }

    #[tokio::test]
    async fn duplicate_source_rejected_even_after_soft_delete() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let entry = store.create(new_entry(user, 1, 100, 500)).await.unwrap();
        assert!(matches!(
            store.create(new_entry(user, 1, 100, 500)).await,
            Err(AppError::DuplicateSource)
        ));

        assert!(store.soft_delete(entry.id, user, Utc::now()).await.unwrap());
        // Dedupe must still see the deleted row.
        assert!(store.exists_by_source_any(1, 100).await.unwrap());
        assert!(matches!(
            store.create(new_entry(user, 1, 100, 500)).await,
            Err(AppError::DuplicateSource)
        ));
    }

    #[tokio::test]
    async fn soft_delete_is_idempotent_and_hides_entry() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let entry = store.create(new_entry(user, 1, 1, 300)).await.unwrap();

        assert!(store.soft_delete(entry.id, user, Utc::now()).await.unwrap());
        assert!(!store.soft_delete(entry.id, user, Utc::now()).await.unwrap());

        assert!(store.get_by_id(entry.id, user).await.unwrap().is_none());
        assert!(store.list_recent(user, 10).await.unwrap().is_empty());
        let totals = store
            .totals_by_local_date(user, date(2024, 6, 19), date(2024, 6, 19))
            .await
            .unwrap();
        assert!(totals.is_empty());
    }

    #[tokio::test]
    async fn cross_user_access_is_not_found() {
        let store = MemStore::new();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let entry = store.create(new_entry(owner, 1, 1, 300)).await.unwrap();

        assert!(store.get_by_id(entry.id, stranger).await.unwrap().is_none());
        assert!(matches!(
            store.update(entry.id, stranger, nutrition(1), Utc::now()).await,
            Err(AppError::NotFound)
        ));
        assert!(!store.soft_delete(entry.id, stranger, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn update_keeps_id_and_replaces_payload() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let entry = store.create(new_entry(user, 1, 1, 300)).await.unwrap();

        let updated = store
            .update(entry.id, user, nutrition(450), Utc::now())
            .await
            .unwrap();
        assert_eq!(updated.id, entry.id);
        assert_eq!(updated.calories_kcal, 450);
        assert_eq!(store.list_recent(user, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_only_old_soft_deleted_rows() {
        let store = MemStore::new();
        let user = Uuid::new_v4();
        let old = store.create(new_entry(user, 1, 1, 100)).await.unwrap();
        let fresh = store.create(new_entry(user, 1, 2, 100)).await.unwrap();
        let active = store.create(new_entry(user, 1, 3, 100)).await.unwrap();

        let now = Utc::now();
        store
            .soft_delete(old.id, user, now - chrono::Duration::days(40))
            .await
            .unwrap();
        store
            .soft_delete(fresh.id, user, now - chrono::Duration::days(2))
            .await
            .unwrap();

        let purged = store
            .purge_deleted_before(now - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        // The recently deleted row is still there (soft-deleted), the
        // active one untouched.
        assert!(store.exists_by_source_any(1, 2).await.unwrap());
        assert!(store.get_by_id(active.id, user).await.unwrap().is_some());
        assert!(!store.exists_by_source_any(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn get_or_create_is_stable() {
        let store = MemStore::new();
        let a = store.get_or_create(42).await.unwrap();
        let b = store.get_or_create(42).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.language, "EN");
    }

    #[tokio::test]
    async fn claim_inactive_claims_once() {
        let store = MemStore::new();
        let user = store.get_or_create(1).await.unwrap();
        store
            .update_timezone(user.id, "offset", None, Some(0))
            .await
            .unwrap();
        let now = Utc::now();
        store
            .touch_activity(1, now - chrono::Duration::hours(10))
            .await
            .unwrap();

        let cutoff = now - chrono::Duration::hours(6);
        let claimed = store.claim_inactive(cutoff, cutoff, now).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Second trigger within the cooldown claims nobody.
        let claimed = store.claim_inactive(cutoff, cutoff, now).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn users_without_timezone_are_never_claimed() {
        let store = MemStore::new();
        store.get_or_create(1).await.unwrap();
        let now = Utc::now();
        store
            .touch_activity(1, now - chrono::Duration::hours(10))
            .await
            .unwrap();
        let cutoff = now - chrono::Duration::hours(6);
        assert!(store.claim_inactive(cutoff, cutoff, now).await.unwrap().is_empty());
    }
}
