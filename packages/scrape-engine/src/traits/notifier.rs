//! Session notifications.
//!
//! Delivery is best-effort. The orchestrator bounds each call with a
//! timeout, logs failures, and never retries.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::NotifyError;
use crate::types::session::{SessionId, SessionReport};
use crate::types::target::Target;

/// A lifecycle event worth telling someone about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session entered `running`.
    Started { session_id: SessionId, target: Target },

    /// Session drained its adapter and finalized as `completed`.
    Completed(SessionReport),

    /// Session finalized as `failed`.
    Error(SessionReport),
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Started { session_id, .. } => *session_id,
            SessionEvent::Completed(report) | SessionEvent::Error(report) => report.session_id,
        }
    }

    pub fn target(&self) -> Target {
        match self {
            SessionEvent::Started { target, .. } => *target,
            SessionEvent::Completed(report) | SessionEvent::Error(report) => report.target,
        }
    }

    /// Event name as sent to the notifier.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Started { .. } => "started",
            SessionEvent::Completed(_) => "completed",
            SessionEvent::Error(_) => "error",
        }
    }
}

/// Fire-and-forget sink for session events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &SessionEvent) -> Result<(), NotifyError>;
}

/// Notifier that writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &SessionEvent) -> Result<(), NotifyError> {
        match event {
            SessionEvent::Started { session_id, target } => {
                info!(session_id = %session_id, target = %target, "Session started");
            }
            SessionEvent::Completed(report) | SessionEvent::Error(report) => {
                info!(
                    session_id = %report.session_id,
                    target = %report.target,
                    event = event.kind(),
                    pages = report.counters.pages_scraped,
                    records = report.counters.total_records,
                    errors = report.counters.error_count,
                    duration_secs = report.duration.as_secs_f64(),
                    error = report.error.as_deref().unwrap_or(""),
                    "Session finished"
                );
            }
        }
        Ok(())
    }
}
