use std::time::{Duration, Instant};

use ahash::AHashMap;
use dashmap::DashMap;
use tracing::debug;

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

/// Admission quota over a trailing window.
#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub max_requests: usize,
    pub window: Duration,
}

impl Quota {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter keyed by system id.
///
/// Each system keeps the timestamps of its admitted requests inside the
/// trailing window; stale entries are purged lazily on every check. The
/// dashmap entry guard makes purge-then-admit atomic per system, so two
/// concurrent checks can never both take the last slot.
pub struct RateLimiter {
    default_quota: Quota,
    overrides: AHashMap<String, Quota>,
    windows: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(default_quota: Quota) -> Self {
        Self {
            default_quota,
            overrides: AHashMap::new(),
            windows: DashMap::new(),
        }
    }

    /// Attach per-system quota overrides (fixed for the process lifetime).
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (String, Quota)>) -> Self {
        self.overrides = overrides.into_iter().collect();
        self
    }

    /// The quota that applies to `system_id`.
    pub fn quota_for(&self, system_id: &str) -> Quota {
        self.overrides
            .get(system_id)
            .copied()
            .unwrap_or(self.default_quota)
    }

    /// Admit or reject one request for `system_id`.
    ///
    /// Purges expired timestamps, rejects when the window is full, and
    /// otherwise records the request.
    pub fn check(&self, system_id: &str) -> bool {
        let quota = self.quota_for(system_id);
        let now = Instant::now();

        let mut window = self.windows.entry(system_id.to_string()).or_default();
        window.retain(|t| now.duration_since(*t) < quota.window);

        if window.len() >= quota.max_requests {
            debug!(system_id, in_window = window.len(), "rate limit exceeded");
            return false;
        }
        window.push(now);
        true
    }

    /// How many admissions remain in the current window.
    pub fn remaining(&self, system_id: &str) -> usize {
        let quota = self.quota_for(system_id);
        let now = Instant::now();

        let mut window = self.windows.entry(system_id.to_string()).or_default();
        window.retain(|t| now.duration_since(*t) < quota.window);
        quota.max_requests.saturating_sub(window.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
