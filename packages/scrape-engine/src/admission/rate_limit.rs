//! Sliding-window rate limiter with temporary bans.
//!
//! Each identifier keeps two windows: timestamps of allowed requests and
//! timestamps of every attempt. Allowed requests per window never exceed
//! the limit. Once attempts inside the window exceed twice the limit the
//! identifier is banned, and every check fails until the ban expires.
//!
//! Stale entries are purged lazily on each check.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::AdmissionError;

/// Current quota for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitInfo {
    pub requests_made: usize,
    pub requests_remaining: usize,
    pub limit: usize,
    pub window: Duration,

    /// Time until the oldest allowed request leaves the window.
    pub reset_in: Duration,
    pub banned: bool,
}

#[derive(Debug, Default)]
struct Window {
    allowed: VecDeque<Instant>,
    attempts: VecDeque<Instant>,
}

impl Window {
    fn purge(&mut self, now: Instant, window: Duration) {
        let expired = |t: &Instant| now.saturating_duration_since(*t) >= window;
        while self.allowed.front().is_some_and(expired) {
            self.allowed.pop_front();
        }
        while self.attempts.front().is_some_and(expired) {
            self.attempts.pop_front();
        }
    }

    fn reset_in(&self, now: Instant, window: Duration) -> Duration {
        self.allowed
            .front()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<String, Window>,
    bans: HashMap<String, Instant>,
}

/// Per-identifier sliding-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    ban_duration: Duration,
}

impl RateLimiter {
    pub fn new(ban_duration: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState::default()),
            ban_duration,
        }
    }

    fn state(&self) -> MutexGuard<'_, LimiterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check and record one request.
    pub fn check(
        &self,
        identifier: &str,
        max_requests: usize,
        window: Duration,
    ) -> Result<(), AdmissionError> {
        self.check_at(identifier, max_requests, window, Instant::now())
    }

    /// `check` with an explicit clock.
    pub fn check_at(
        &self,
        identifier: &str,
        max_requests: usize,
        window: Duration,
        now: Instant,
    ) -> Result<(), AdmissionError> {
        let mut guard = self.state();
        let state = &mut *guard;

        if let Some(&banned_at) = state.bans.get(identifier) {
            let elapsed = now.saturating_duration_since(banned_at);
            if elapsed < self.ban_duration {
                return Err(AdmissionError::Banned {
                    identifier: identifier.to_string(),
                    retry_after: self.ban_duration - elapsed,
                });
            }
            state.bans.remove(identifier);
            if let Some(w) = state.windows.get_mut(identifier) {
                w.attempts.clear();
            }
            debug!(identifier, "Ban expired");
        }

        let entry = state.windows.entry(identifier.to_string()).or_default();
        entry.purge(now, window);
        entry.attempts.push_back(now);

        if entry.attempts.len() > max_requests.saturating_mul(2) {
            let attempts = entry.attempts.len();
            state.bans.insert(identifier.to_string(), now);
            warn!(
                identifier,
                attempts,
                limit = max_requests,
                ban_secs = self.ban_duration.as_secs(),
                "Identifier banned for exceeding rate limit"
            );
            return Err(AdmissionError::Banned {
                identifier: identifier.to_string(),
                retry_after: self.ban_duration,
            });
        }

        if entry.allowed.len() >= max_requests {
            let retry_after = if entry.allowed.is_empty() {
                window
            } else {
                entry.reset_in(now, window)
            };
            return Err(AdmissionError::RateLimited {
                identifier: identifier.to_string(),
                retry_after,
            });
        }

        entry.allowed.push_back(now);
        Ok(())
    }

    /// Whether `identifier` is currently banned.
    pub fn is_banned(&self, identifier: &str) -> bool {
        self.is_banned_at(identifier, Instant::now())
    }

    pub fn is_banned_at(&self, identifier: &str, now: Instant) -> bool {
        self.state()
            .bans
            .get(identifier)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.ban_duration)
    }

    /// Quota for `identifier` without recording a request.
    pub fn info(&self, identifier: &str, max_requests: usize, window: Duration) -> RateLimitInfo {
        self.info_at(identifier, max_requests, window, Instant::now())
    }

    pub fn info_at(
        &self,
        identifier: &str,
        max_requests: usize,
        window: Duration,
        now: Instant,
    ) -> RateLimitInfo {
        let banned = self.is_banned_at(identifier, now);
        let state = self.state();
        let (requests_made, reset_in) = match state.windows.get(identifier) {
            Some(w) => {
                let live = w
                    .allowed
                    .iter()
                    .filter(|t| now.saturating_duration_since(**t) < window)
                    .count();
                let oldest_live = w
                    .allowed
                    .iter()
                    .find(|t| now.saturating_duration_since(**t) < window)
                    .map(|t| window.saturating_sub(now.saturating_duration_since(*t)))
                    .unwrap_or(Duration::ZERO);
                (live, oldest_live)
            }
            None => (0, Duration::ZERO),
        };

        RateLimitInfo {
            requests_made,
            requests_remaining: max_requests.saturating_sub(requests_made),
            limit: max_requests,
            window,
            reset_in,
            banned,
        }
    }
}
