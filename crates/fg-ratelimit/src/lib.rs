// SPDX-License-Identifier: MIT OR Apache-2.0
//! Composite sliding-window rate limiting for the function gateway.
//!
//! Each dimension (`ip`, `function`, ...) is an independent fixed-window
//! [`Limiter`]; [`CompositeLimiter`] combines several dimensions behind a
//! two-phase `check_and_increment_all` so that a request denied by one
//! dimension never partially consumes another's budget.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall-clock time source, abstracted so tests can control the passage of
/// time instead of racing a real clock.
pub trait Clock: Send + Sync {
    /// Current wall-clock time as milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// A [`Clock`] backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before the Unix epoch")
            .as_millis() as i64
    }
}

// ---------------------------------------------------------------------------
// Single-dimension limiter
// ---------------------------------------------------------------------------

/// Window length and request budget for one rate-limit dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Fixed-window duration, in milliseconds.
    pub window_ms: u64,
    /// Requests allowed per window.
    pub max_requests: u32,
}

/// Per-key fixed-window state: requests consumed and when the window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowState {
    count: u32,
    reset_at_ms: i64,
}

/// Outcome of a rate-limit check for a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    /// `true` if the request is (or would be) allowed.
    pub allowed: bool,
    /// Requests remaining in the current window after this check.
    pub remaining: u32,
    /// Wall-clock millisecond timestamp when the window resets.
    pub reset_at_ms: i64,
}

/// A single fixed-duration sliding-window rate limiter, keyed by an
/// arbitrary string (client IP, function id, ...).
///
/// Window state is guarded by a [`tokio::sync::Mutex`] rather than a std
/// mutex because checks happen inside async request handlers.
pub struct Limiter {
    config: LimiterConfig,
    windows: Mutex<HashMap<String, WindowState>>,
    clock: Box<dyn Clock>,
}

impl Limiter {
    /// Construct a limiter using the real system clock.
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    /// Construct a limiter with an explicit [`Clock`], for deterministic tests.
    pub fn with_clock(config: LimiterConfig, clock: impl Clock + 'static) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            clock: Box::new(clock),
        }
    }

    /// Read-only check: does not mutate window state.
    pub async fn check(&self, key: &str) -> CheckResult {
        let now = self.clock.now_ms();
        let windows = self.windows.lock().await;
        self.check_locked(&windows, key, now)
    }

    fn check_locked(&self, windows: &HashMap<String, WindowState>, key: &str, now: i64) -> CheckResult {
        match windows.get(key) {
            Some(state) if state.reset_at_ms > now => CheckResult {
                allowed: state.count < self.config.max_requests,
                remaining: self.config.max_requests.saturating_sub(state.count),
                reset_at_ms: state.reset_at_ms,
            },
            _ => {
                let reset_at_ms = now + self.config.window_ms as i64;
                CheckResult {
                    allowed: self.config.max_requests > 0,
                    remaining: self.config.max_requests,
                    reset_at_ms,
                }
            }
        }
    }

    /// Bump the counter for `key`, creating or resetting the window as needed.
    pub async fn increment(&self, key: &str) {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock().await;
        self.increment_locked(&mut windows, key, now);
    }

    fn increment_locked(&self, windows: &mut HashMap<String, WindowState>, key: &str, now: i64) {
        windows
            .entry(key.to_string())
            .and_modify(|state| {
                if state.reset_at_ms <= now {
                    state.count = 1;
                    state.reset_at_ms = now + self.config.window_ms as i64;
                } else {
                    state.count += 1;
                }
            })
            .or_insert_with(|| WindowState {
                count: 1,
                reset_at_ms: now + self.config.window_ms as i64,
            });
    }

    /// Atomic check-and-consume: increments and reports `allowed=true` only
    /// if the current count is below the maximum; otherwise leaves state
    /// untouched and reports `allowed=false`.
    pub async fn check_and_increment(&self, key: &str) -> CheckResult {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock().await;
        let result = self.check_locked(&windows, key, now);
        if result.allowed {
            self.increment_locked(&mut windows, key, now);
            CheckResult {
                allowed: true,
                remaining: result.remaining.saturating_sub(1),
                reset_at_ms: result.reset_at_ms,
            }
        } else {
            result
        }
    }

    /// Delete any window state for `key`.
    pub async fn reset(&self, key: &str) {
        self.windows.lock().await.remove(key);
    }
}

// ---------------------------------------------------------------------------
// Composite limiter
// ---------------------------------------------------------------------------

/// Outcome of a composite, multi-dimension rate-limit check.
#[derive(Debug, Clone)]
pub struct CompositeResult {
    /// `true` only if every dimension allowed the request.
    pub allowed: bool,
    /// The first (in registration order) dimension that denied the request.
    pub blocking_category: Option<String>,
    /// Per-dimension results, keyed by category.
    pub results: HashMap<String, CheckResult>,
}

impl CompositeResult {
    /// `Retry-After`, in whole seconds (ceiling), derived from the blocking
    /// dimension's reset time. `0` if nothing is blocking.
    #[must_use]
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let Some(category) = &self.blocking_category else {
            return 0;
        };
        let Some(result) = self.results.get(category) else {
            return 0;
        };
        let remaining_ms = (result.reset_at_ms - now_ms).max(0);
        remaining_ms.div_ceil(1000) as u64
    }

    /// The blocking dimension's reset timestamp (milliseconds since the
    /// Unix epoch), or `None` if nothing is blocking.
    #[must_use]
    pub fn blocking_reset_at_ms(&self) -> Option<i64> {
        let category = self.blocking_category.as_ref()?;
        self.results.get(category).map(|r| r.reset_at_ms)
    }
}

/// A named group of [`Limiter`] dimensions, checked and consumed atomically
/// as a unit.
///
/// Dimensions are consulted in registration order. `check_and_increment_all`
/// is two-phase: every dimension is first checked read-only; only if *all*
/// dimensions would allow the request are their counters incremented. This
/// guarantees a request denied by one dimension never partially consumes
/// another dimension's budget.
#[derive(Default)]
pub struct CompositeLimiter {
    dimensions: Vec<(String, Limiter)>,
}

impl CompositeLimiter {
    /// Construct an empty composite limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dimension. Dimensions are checked in the order registered.
    #[must_use]
    pub fn register(mut self, category: impl Into<String>, limiter: Limiter) -> Self {
        self.dimensions.push((category.into(), limiter));
        self
    }

    /// Two-phase atomic check-and-consume across every registered dimension.
    ///
    /// `keys` maps each registered category to the key to check for that
    /// dimension (e.g. `{"ip": "10.0.0.1", "function": "f1"}`). A dimension
    /// with no entry in `keys` is skipped.
    pub async fn check_and_increment_all(&self, keys: &HashMap<String, String>) -> CompositeResult {
        let mut results = HashMap::new();
        let mut blocking_category = None;

        for (category, limiter) in &self.dimensions {
            let Some(key) = keys.get(category) else {
                continue;
            };
            let result = limiter.check(key).await;
            let denied = !result.allowed;
            results.insert(category.clone(), result);
            if denied && blocking_category.is_none() {
                blocking_category = Some(category.clone());
            }
        }

        if blocking_category.is_some() {
            return CompositeResult {
                allowed: false,
                blocking_category,
                results,
            };
        }

        for (category, limiter) in &self.dimensions {
            let Some(key) = keys.get(category) else {
                continue;
            };
            let result = limiter.check_and_increment(key).await;
            results.insert(category.clone(), result);
        }

        CompositeResult {
            allowed: true,
            blocking_category: None,
            results,
        }
    }
}

// ---------------------------------------------------------------------------
// Client IP extraction
// ---------------------------------------------------------------------------

/// Extract the client IP used as the `ip` dimension's key.
///
/// Checked in order: `CF-Connecting-IP`, the first element of a
/// comma-split `X-Forwarded-For`, `X-Real-IP`; falls back to the literal
/// `"unknown"`. `lookup` should perform a case-insensitive header lookup.
pub fn extract_client_ip(lookup: impl Fn(&str) -> Option<String>) -> String {
    if let Some(ip) = lookup("CF-Connecting-IP") {
        let trimmed = ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(forwarded) = lookup("X-Forwarded-For") {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(ip) = lookup("X-Real-IP") {
        let trimmed = ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    "unknown".to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
