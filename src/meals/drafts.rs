//! Per-user draft state: a proposed analysis awaiting confirmation.
//!
//! Drafts are transient, keyed by external user id, at most one per
//! user. Expiry is an explicit timestamp checked on access. All of
//! this lives in process memory — a restart loses in-flight drafts,
//! an accepted trade-off.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::ai::NutritionAnalysis;

#[derive(Debug, Clone)]
pub struct Draft {
    pub analysis: NutritionAnalysis,
    pub source: String,
    pub original_text: Option<String>,
    pub photo_file_id: Option<String>,
    pub chat_id: i64,
    pub message_id: i64,
    /// Set when this draft is a re-analysis of a saved entry; confirm
    /// updates that row in place instead of creating one.
    pub edit_of: Option<Uuid>,
    pub expires_at: Instant,
}

pub struct DraftStore {
    ttl: Duration,
    inner: Mutex<HashMap<i64, Draft>>,
}

impl DraftStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a draft for the user, replacing any previous one.
    pub fn put(&self, user_id: i64, mut draft: Draft) {
        draft.expires_at = Instant::now() + self.ttl;
        self.inner.lock().expect("draft lock").insert(user_id, draft);
    }

    /// Remove and return the user's draft, if present and not expired.
    /// An expired draft is dropped as if it never existed.
    pub fn take(&self, user_id: i64) -> Option<Draft> {
        let mut inner = self.inner.lock().expect("draft lock");
        let draft = inner.remove(&user_id)?;
        if draft.expires_at <= Instant::now() {
            return None;
        }
        Some(draft)
    }

    /// Discard the user's draft; returns whether one was live.
    pub fn discard(&self, user_id: i64) -> bool {
        let mut inner = self.inner.lock().expect("draft lock");
        match inner.remove(&user_id) {
            Some(draft) => draft.expires_at > Instant::now(),
            None => false,
        }
    }

    /// Discard the user's draft only if it satisfies `pred`; returns
    /// whether one was removed. Used to drop a pending edit when its
    /// target entry goes away.
    pub fn discard_matching(
        &self,
        user_id: i64,
        pred: impl FnOnce(&Draft) -> bool,
    ) -> bool {
        let mut inner = self.inner.lock().expect("draft lock");
        match inner.get(&user_id) {
            Some(draft) if pred(draft) => {
                inner.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Drop every expired draft; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().expect("draft lock");
        let before = inner.len();
        let now = Instant::now();
        inner.retain(|_, d| d.expires_at > now);
        before - inner.len()
    }
}
