//! Session types - the lifecycle record of one scraping job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::types::identity::RotationStrategy;
use crate::types::target::Target;

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status.
///
/// Transitions are monotonic: `pending -> running -> {completed | failed}`,
/// plus `pending -> failed` when the execution context cannot be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Whether no further mutation may occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Whether `self -> next` is an allowed edge. Re-asserting the current
    /// non-terminal status is allowed so counters can be written in place.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Running)
                | (Pending, Failed)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Progress counters. Only ever incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub pages_scraped: u32,
    pub total_records: u32,
    pub error_count: u32,
}

impl SessionCounters {
    /// True if no field of `next` is smaller than the matching field of `self`.
    pub fn is_superseded_by(&self, next: &SessionCounters) -> bool {
        next.pages_scraped >= self.pages_scraped
            && next.total_records >= self.total_records
            && next.error_count >= self.error_count
    }
}

/// Query parameters for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Medical specialty, e.g. "Kardiologe"
    pub specialty: String,

    /// City, e.g. "Berlin"
    pub city: String,

    /// Page budget. Zero is treated as one.
    pub max_pages: u32,

    /// Base delay between requests, jittered up to twice this value.
    pub delay_seconds: u64,

    /// Whether to route requests through an egress identity.
    pub use_proxy: bool,

    /// How to pick the egress identity.
    #[serde(default)]
    pub rotation: RotationStrategy,
}

impl SearchQuery {
    /// Create a query with default budget (10 pages), delay (5s) and no proxy.
    pub fn new(specialty: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            specialty: specialty.into(),
            city: city.into(),
            max_pages: 10,
            delay_seconds: 5,
            use_proxy: false,
            rotation: RotationStrategy::default(),
        }
    }

    /// Set the page budget.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set the inter-request delay.
    pub fn with_delay_seconds(mut self, seconds: u64) -> Self {
        self.delay_seconds = seconds;
        self
    }

    /// Route through the egress pool.
    pub fn with_proxy(mut self, rotation: RotationStrategy) -> Self {
        self.use_proxy = true;
        self.rotation = rotation;
        self
    }

    /// The effective page budget (at least one page).
    pub fn page_budget(&self) -> u32 {
        self.max_pages.max(1)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

/// A request to start a session, before admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub target: Target,
    pub query: SearchQuery,

    /// Admission identifier (client IP or API key).
    pub requester: String,
}

impl SessionRequest {
    pub fn new(target: Target, query: SearchQuery, requester: impl Into<String>) -> Self {
        Self {
            target,
            query,
            requester: requester.into(),
        }
    }
}

/// A persisted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub target: Target,
    pub query: SearchQuery,
    pub status: SessionStatus,
    pub counters: SessionCounters,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Error text for failed sessions.
    pub error: Option<String>,
}

impl Session {
    /// Create a new pending session.
    pub fn new(target: Target, query: SearchQuery) -> Self {
        Self {
            id: SessionId::new(),
            target,
            query,
            status: SessionStatus::Pending,
            counters: SessionCounters::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Apply a status update, stamping `started_at`/`completed_at`.
    ///
    /// Callers validate the transition and counters first.
    pub fn apply(&mut self, update: &SessionUpdate, now: DateTime<Utc>) {
        if update.status == SessionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if update.status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.status = update.status;
        if let Some(counters) = update.counters {
            self.counters = counters;
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
    }
}

/// A status change with optional counters and error detail.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub status: SessionStatus,
    pub counters: Option<SessionCounters>,
    pub error: Option<String>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status,
            counters: None,
            error: None,
        }
    }

    pub fn with_counters(mut self, counters: SessionCounters) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Final outcome of a session, also used as the notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub target: Target,
    pub status: SessionStatus,
    pub counters: SessionCounters,

    /// Wall time from scheduling to finalization.
    #[serde(with = "duration_secs")]
    pub duration: Duration,

    pub error: Option<String>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn test_apply_stamps_timestamps() {
        let mut session = Session::new(Target::Doctolib, SearchQuery::new("Kardiologe", "Berlin"));
        let now = Utc::now();

        session.apply(&SessionUpdate::status(SessionStatus::Running), now);
        assert_eq!(session.started_at, Some(now));
        assert!(session.completed_at.is_none());

        let counters = SessionCounters {
            pages_scraped: 1,
            total_records: 2,
            error_count: 0,
        };
        session.apply(
            &SessionUpdate::status(SessionStatus::Completed).with_counters(counters),
            now,
        );
        assert_eq!(session.completed_at, Some(now));
        assert_eq!(session.counters, counters);
    }

    #[test]
    fn test_counter_regression_detection() {
        let a = SessionCounters {
            pages_scraped: 2,
            total_records: 5,
            error_count: 1,
        };
        let mut b = a;
        b.total_records = 7;
        assert!(a.is_superseded_by(&b));
        b.error_count = 0;
        assert!(!a.is_superseded_by(&b));
    }

    #[test]
    fn test_page_budget_clamped() {
        let q = SearchQuery::new("Zahnarzt", "Hamburg").with_max_pages(0);
        assert_eq!(q.page_budget(), 1);
    }
}
