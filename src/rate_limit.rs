use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a rate-limit check. On denial `retry_after` carries the
/// remaining window as an advisory for the caller's 429 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

#[derive(Debug)]
struct WindowEntry {
    count: u32,
    window_reset_at: Instant,
}

/// Fixed-window rate limiter keyed by an arbitrary client key.
///
/// Windows are approximate: a burst can span a window boundary. That is the
/// accepted trade-off of the fixed-window strategy; callers needing smooth
/// admission should front this with a token bucket instead.
///
/// The limiter is a plain injectable value (held in `AppState` or owned by a
/// component), never process-global, so tests construct their own instances.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks and counts one event for `key`. Atomic under concurrent callers.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> Decision {
        self.check_at(key, limit, window, Instant::now())
    }

    fn check_at(&self, key: &str, limit: u32, window: Duration, now: Instant) -> Decision {
        let mut entries = self.entries.lock().expect("rate limiter lock poisoned");

        match entries.get_mut(key) {
            Some(entry) if now < entry.window_reset_at => {
                entry.count += 1;
                if entry.count <= limit {
                    Decision::Allowed
                } else {
                    Decision::Denied {
                        retry_after: entry.window_reset_at - now,
                    }
                }
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    WindowEntry {
                        count: 1,
                        window_reset_at: now + window,
                    },
                );
                if limit == 0 {
                    Decision::Denied { retry_after: window }
                } else {
                    Decision::Allowed
                }
            }
        }
    }

    /// Drops entries whose window has elapsed. Run periodically so idle
    /// client keys do not accumulate.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("rate limiter lock poisoned");
        entries.retain(|_, entry| now < entry.window_reset_at);
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().expect("rate limiter lock poisoned").len()
    }
}
