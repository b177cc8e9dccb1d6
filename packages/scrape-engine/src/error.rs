//! Typed errors for the scrape engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match on
//! the failure class: admission rejections never create a session, extraction
//! and persistence failures terminate one.

use std::time::Duration;

use thiserror::Error;

use crate::types::session::SessionStatus;
use crate::types::target::Target;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rate limit, ban or concurrency cap. No session was created.
    #[error("admission rejected: {0}")]
    AdmissionRejected(#[from] AdmissionError),

    /// Target is not on the allow-list or has no registered adapter.
    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),

    /// A proxy was requested, none is healthy, and the policy forbids a direct connection.
    #[error("no healthy egress identity available")]
    EgressUnavailable,

    /// Fatal adapter failure.
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Record store failure.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The spawned session task panicked or was aborted.
    #[error("session task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Reasons the admission controller refuses work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// Too many requests inside the sliding window.
    #[error("rate limit exceeded for {identifier}, retry after {}s", .retry_after.as_secs())]
    RateLimited {
        identifier: String,
        retry_after: Duration,
    },

    /// Identifier is temporarily banned.
    #[error("{identifier} is banned, retry after {}s", .retry_after.as_secs())]
    Banned {
        identifier: String,
        retry_after: Duration,
    },

    /// Target already runs its maximum number of sessions.
    #[error("too many concurrent sessions for {target}: {active}/{max}")]
    TooManyConcurrentSessions {
        target: Target,
        active: usize,
        max: usize,
    },
}

impl AdmissionError {
    /// How long the caller should wait before re-submitting, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::Banned { retry_after, .. } => {
                Some(*retry_after)
            }
            Self::TooManyConcurrentSessions { .. } => None,
        }
    }
}

/// Errors raised by extraction adapters.
///
/// Only fatal conditions are errors. A page that fails to load or parse is
/// reported as `PageOutcome::Failed` and extraction continues.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Context acquisition failed (client, proxy, first navigation).
    #[error("session setup failed: {0}")]
    Setup(String),

    /// Unrecoverable failure after setup.
    #[error("extraction aborted: {0}")]
    Fatal(String),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Request exceeded its timeout
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Response did not have the expected shape
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ExtractionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            let url = e.url().map(|u| u.to_string()).unwrap_or_default();
            Self::Timeout { url }
        } else {
            Self::Http(Box::new(e))
        }
    }
}

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No session with this id
    #[error("session not found: {0}")]
    NotFound(String),

    /// Status change outside `pending -> running -> {completed|failed}`.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// A counter update would decrease a counter.
    #[error("counter regression on session {0}")]
    CounterRegression(String),

    /// Backend failure
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Notifier delivery failure. Logged by the orchestrator, never propagated.
#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required value is missing
    #[error("missing config value: {0}")]
    Missing(&'static str),

    /// A value could not be parsed
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for extraction operations.
pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
