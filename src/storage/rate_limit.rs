//! Fixed-window request counter keyed by client identity.
//!
//! Windows are not sliding: a client can get up to twice the limit through
//! across a window boundary. That is accepted for abuse prevention.

use crate::clock::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: u64,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
    clock: Arc<dyn Clock>,
    max_requests: u32,
    window_ms: u64,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
            max_requests,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count a request. Returns `false` once the window's budget is spent.
    pub fn allow(&self, client: &str) -> bool {
        let now = self.clock.now_ms();
        let mut windows = self.lock();

        match windows.get_mut(client) {
            Some(window) if now <= window.reset_at => {
                if window.count >= self.max_requests {
                    return false;
                }
                window.count += 1;
                true
            }
            _ => {
                windows.insert(
                    client.to_string(),
                    RateWindow {
                        count: 1,
                        reset_at: now.saturating_add(self.window_ms),
                    },
                );
                true
            }
        }
    }

    /// Requests left in the current window. Read-only.
    pub fn remaining(&self, client: &str) -> u32 {
        let now = self.clock.now_ms();
        match self.lock().get(client) {
            Some(window) if now <= window.reset_at => {
                self.max_requests.saturating_sub(window.count)
            }
            _ => self.max_requests,
        }
    }

    /// When the current window ends, in epoch milliseconds. Read-only.
    pub fn reset_at(&self, client: &str) -> u64 {
        let now = self.clock.now_ms();
        match self.lock().get(client) {
            Some(window) if now <= window.reset_at => window.reset_at,
            _ => now.saturating_add(self.window_ms),
        }
    }

    /// Drop windows that have elapsed. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now_ms();
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, window| now <= window.reset_at);
        before - windows.len()
    }
}
