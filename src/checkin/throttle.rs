//! Local guard for the gateway's verify rate limits.
//!
//! The gateway allows one verify per order and a few per user inside a
//! sliding window. Checking locally keeps callers from burning the
//! gateway's allowance with requests that would be rejected anyway.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Windows {
    /// order ID -> last verify
    orders: HashMap<String, Instant>,
    /// user ID -> verifies inside the window, oldest first
    users: HashMap<String, VecDeque<Instant>>,
}

/// Sliding-window verify throttle.
pub struct VerifyThrottle {
    windows: Mutex<Windows>,
    window: Duration,
    per_user_limit: usize,
}

impl VerifyThrottle {
    pub fn new(window: Duration, per_user_limit: usize) -> Self {
        Self {
            windows: Mutex::new(Windows::default()),
            window,
            per_user_limit: per_user_limit.max(1),
        }
    }

    /// Record a verify attempt, or return how long to wait.
    pub fn try_acquire(&self, order_id: &str, user_id: &str) -> Result<(), Duration> {
        self.try_acquire_at(order_id, user_id, Instant::now())
    }

    fn try_acquire_at(&self, order_id: &str, user_id: &str, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.window;

        if let Some(last) = windows.orders.get(order_id) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < window {
                return Err(window - elapsed);
            }
        }

        let attempts = windows.users.entry(user_id.to_string()).or_default();
        while let Some(oldest) = attempts.front() {
            if now.saturating_duration_since(*oldest) >= window {
                attempts.pop_front();
            } else {
                break;
            }
        }
        if attempts.len() >= self.per_user_limit {
            let oldest = attempts.front().copied().unwrap_or(now);
            return Err(window.saturating_sub(now.saturating_duration_since(oldest)));
        }

        attempts.push_back(now);
        windows.orders.insert(order_id.to_string(), now);
        windows
            .orders
            .retain(|_, last| now.saturating_duration_since(*last) < window);
        windows.users.retain(|_, attempts| {
            while attempts
                .front()
                .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= window)
            {
                attempts.pop_front();
            }
            !attempts.is_empty()
        });
        Ok(())
    }
}
