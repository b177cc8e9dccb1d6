//! Admission control: request rate limiting plus per-target concurrency.

pub mod concurrency;
pub mod rate_limit;

pub use concurrency::{ConcurrencyGate, SessionSlot};
pub use rate_limit::{RateLimitInfo, RateLimiter};

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::AdmissionError;
use crate::types::config::EngineConfig;
use crate::types::target::Target;

/// Combined gate applied before a session exists.
#[derive(Debug)]
pub struct AdmissionController {
    limiter: RateLimiter,
    gate: Arc<ConcurrencyGate>,
    max_requests: usize,
    window: Duration,
}

impl AdmissionController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.ban_duration()),
            gate: ConcurrencyGate::new(config.max_concurrent_sessions_per_target),
            max_requests: config.rate_limit_requests,
            window: config.rate_limit_window(),
        }
    }

    /// Rate-check `identifier`, then claim a slot for `target`.
    pub fn admit(&self, identifier: &str, target: Target) -> Result<SessionSlot, AdmissionError> {
        let result = self
            .limiter
            .check(identifier, self.max_requests, self.window)
            .and_then(|()| self.gate.try_start(target));

        if let Err(e) = &result {
            warn!(identifier, target = %target, error = %e, "Admission rejected");
        }
        result
    }

    /// Quota for `identifier` under the configured limit.
    pub fn rate_info(&self, identifier: &str) -> RateLimitInfo {
        self.limiter.info(identifier, self.max_requests, self.window)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn active_sessions(&self, target: Target) -> usize {
        self.gate.active(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_checks_rate_then_concurrency() {
        let config = EngineConfig::new()
            .with_max_concurrent_sessions(1)
            .with_rate_limit(2, 3600);
        let admission = AdmissionController::new(&config);

        let slot = admission.admit("client", Target::Jameda).unwrap();
        assert!(matches!(
            admission.admit("client", Target::Jameda),
            Err(AdmissionError::TooManyConcurrentSessions { .. })
        ));
        drop(slot);

        // both earlier attempts consumed the rate budget
        assert!(matches!(
            admission.admit("client", Target::Jameda),
            Err(AdmissionError::RateLimited { .. })
        ));
        assert_eq!(admission.rate_info("client").requests_remaining, 0);
        assert_eq!(admission.active_sessions(Target::Jameda), 0);
    }
}
