//! Per-target concurrency gate.
//!
//! Bounds simultaneous sessions per target, independently of the request
//! rate limiter. A granted start is held as a `SessionSlot`; dropping the
//! slot releases it, so every exit path of a session gives it back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::AdmissionError;
use crate::types::target::Target;

/// Counts active sessions per target.
#[derive(Debug)]
pub struct ConcurrencyGate {
    active: Mutex<HashMap<Target, usize>>,
    max_per_target: usize,
}

impl ConcurrencyGate {
    pub fn new(max_per_target: usize) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            max_per_target,
        })
    }

    fn active_map(&self) -> MutexGuard<'_, HashMap<Target, usize>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim a slot for `target`, or fail if it is at capacity.
    pub fn try_start(self: &Arc<Self>, target: Target) -> Result<SessionSlot, AdmissionError> {
        let mut active = self.active_map();
        let count = active.entry(target).or_insert(0);
        if *count >= self.max_per_target {
            return Err(AdmissionError::TooManyConcurrentSessions {
                target,
                active: *count,
                max: self.max_per_target,
            });
        }
        *count += 1;
        debug!(target = %target, active = *count, "Concurrency slot acquired");

        Ok(SessionSlot {
            gate: Arc::clone(self),
            target,
        })
    }

    /// Release a slot. Floored at zero.
    pub fn finish(&self, target: Target) {
        let mut active = self.active_map();
        let count = active.entry(target).or_insert(0);
        *count = count.saturating_sub(1);
        debug!(target = %target, active = *count, "Concurrency slot released");
    }

    /// Sessions currently holding a slot for `target`.
    pub fn active(&self, target: Target) -> usize {
        self.active_map().get(&target).copied().unwrap_or(0)
    }

    pub fn max_per_target(&self) -> usize {
        self.max_per_target
    }
}

/// A held concurrency slot. Released on drop.
#[derive(Debug)]
pub struct SessionSlot {
    gate: Arc<ConcurrencyGate>,
    target: Target,
}

impl SessionSlot {
    pub fn target(&self) -> Target {
        self.target
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.gate.finish(self.target);
    }
}
