//! Per-user admission control in front of the AI call.
//!
//! Both primitives are process-local, in-memory state. A multi-instance
//! deployment would need a shared store; a single container does not.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sliding-window rate limiter keyed by external user id.
///
/// Timestamps outside the window are lazily pruned on every check. The
/// check-and-record step runs under one lock, so two racing attempts
/// from the same user cannot both be admitted past the limit.
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    windows: Mutex<HashMap<i64, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            max_per_window: max_per_minute,
            window: Duration::from_secs(60),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt and return whether it is admitted.
    pub fn check(&self, user_id: i64) -> bool {
        self.check_at(user_id, Instant::now())
    }

    fn check_at(&self, user_id: i64, now: Instant) -> bool {
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        // Timestamps are pushed in order, so a stale newest timestamp
        // means the whole entry has aged out; dropping it keeps the map
        // bounded to recently active users.
        windows.retain(|_, w| {
            w.last()
                .is_some_and(|t| now.duration_since(*t) < self.window)
        });

        let window = windows.entry(user_id).or_default();
        window.retain(|t| now.duration_since(*t) < self.window);

        if window.len() >= self.max_per_window {
            return false;
        }
        window.push(now);
        true
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.windows.lock().expect("rate limiter lock poisoned").len()
    }
}

/// Per-user single-flight guard: at most one in-flight analysis.
///
/// A second concurrent attempt is refused immediately, never queued.
/// The slot is held by a [`FlightPermit`] and released on `Drop`, so
/// every exit path (including a panic unwind) frees it exactly once.
#[derive(Clone, Default)]
pub struct ConcurrencyGuard {
    active: Arc<Mutex<HashSet<i64>>>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, user_id: i64) -> Option<FlightPermit> {
        let mut active = self.active.lock().expect("concurrency guard lock poisoned");
        if !active.insert(user_id) {
            return None;
        }
        Some(FlightPermit {
            user_id,
            active: Arc::clone(&self.active),
        })
    }
}

/// RAII slot held for the duration of one analysis.
pub struct FlightPermit {
    user_id: i64,
    active: Arc<Mutex<HashSet<i64>>>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.user_id);
        }
    }
}
