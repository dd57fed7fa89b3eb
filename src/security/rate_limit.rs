//! Sliding-window rate limiter keyed by client identifier.
//!
//! Each client owns a FIFO of the instants at which its attempts were
//! accepted. Rejected attempts are never recorded, so a client that keeps
//! hammering is let back in exactly `period` after its oldest accepted
//! attempt.

use crate::clock::SharedClock;
use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

type Window = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// Thread-safe per-client sliding-window limiter.
pub struct RateLimiter {
    max_requests: usize,
    period: Duration,
    clock: SharedClock,
    /// Guards creation and removal of per-client windows.
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, period: Duration, clock: SharedClock) -> Self {
        Self {
            max_requests,
            period,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt from `client_id` now. Returns `false` when the
    /// client already has `max_requests` accepted attempts inside the window.
    pub fn is_allowed(&self, client_id: &str) -> bool {
        let now = self.clock.now();

        // Opportunistic sweep during the first second of every minute.
        if now.second() == 0 {
            self.cleanup(now);
        }

        let window = self.window_for(client_id);
        let mut queue = window.lock();

        evict_expired(&mut queue, now, self.period);

        if queue.len() >= self.max_requests {
            warn!(client = client_id, attempts = queue.len(), "rate limit exceeded");
            return false;
        }

        // Rejections return above, so the queue never grows past `max_requests`.
        queue.push_back(now);
        true
    }

    /// Drop windows that hold no live timestamps. Returns how many were removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| {
            // A caller between `window_for` and its own lock holds a second
            // reference; removing the entry then would lose its attempt.
            if Arc::strong_count(window) > 1 {
                return true;
            }
            let mut queue = window.lock();
            evict_expired(&mut queue, now, self.period);
            !queue.is_empty()
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, remaining = windows.len(), "rate limiter sweep");
        }
        removed
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }

    fn window_for(&self, client_id: &str) -> Window {
        let mut windows = self.windows.lock();
        windows
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.max_requests))))
            .clone()
    }
}

fn evict_expired(queue: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, period: Duration) {
    while let Some(oldest) = queue.front() {
        if now - *oldest >= period {
            queue.pop_front();
        } else {
            break;
        }
    }
}
