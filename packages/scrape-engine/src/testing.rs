//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the scrape engine
//! without making real network calls.

use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::adapters::ProviderDedup;
use crate::error::{ExtractionError, ExtractionResult, NotifyError, StoreError, StoreResult};
use crate::stores::MemoryStore;
use crate::traits::{
    adapter::{ContextOptions, PageOutcome, PageStream, SiteAdapter, SiteSession},
    notifier::{Notifier, SessionEvent},
    probe::{HealthProbe, ProbeReport},
    store::RecordStore,
};
use crate::types::{
    identity::EgressIdentity,
    record::{ExtractedRecord, ProviderRecord, RecordId, StoredRecord},
    session::{SearchQuery, Session, SessionId, SessionStatus, SessionUpdate},
    target::Target,
};

/// One scripted page of a `MockAdapter`.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Page with these raw records (deduplicated by the session).
    Page(Vec<ProviderRecord>),
    /// Page-level failure.
    FailedPage(String),
    /// Fatal error that ends the session.
    Fatal(String),
    /// Panic inside the adapter.
    Panic(String),
}

#[derive(Default)]
struct MockAdapterState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    egress_seen: RwLock<Vec<Option<String>>>,
}

/// A scripted adapter for testing.
///
/// Every session replays the same steps, one per page, up to the query's
/// page budget. Clones share call tracking.
#[derive(Clone)]
pub struct MockAdapter {
    target: Target,
    steps: Vec<MockStep>,
    open_error: Option<String>,
    gate: Option<Arc<Semaphore>>,
    state: Arc<MockAdapterState>,
}

impl MockAdapter {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            steps: Vec::new(),
            open_error: None,
            gate: None,
            state: Arc::new(MockAdapterState::default()),
        }
    }

    /// Add a page with these raw records.
    pub fn with_page(mut self, records: Vec<ProviderRecord>) -> Self {
        self.steps.push(MockStep::Page(records));
        self
    }

    /// Add a page that fails to load.
    pub fn with_failed_page(mut self, error: impl Into<String>) -> Self {
        self.steps.push(MockStep::FailedPage(error.into()));
        self
    }

    /// End the stream with a fatal error.
    pub fn with_fatal(mut self, error: impl Into<String>) -> Self {
        self.steps.push(MockStep::Fatal(error.into()));
        self
    }

    /// Panic when this page is reached.
    pub fn with_panic(mut self, message: impl Into<String>) -> Self {
        self.steps.push(MockStep::Panic(message.into()));
        self
    }

    /// Make `open` fail, as when no network context can be acquired.
    pub fn failing_open(mut self, error: impl Into<String>) -> Self {
        self.open_error = Some(error.into());
        self
    }

    /// Hold each session before its first page until the semaphore has a
    /// permit.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Sessions currently open.
    pub fn active_sessions(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Highest number of sessions open at once.
    pub fn max_active_sessions(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    /// Egress endpoint passed to each `open`, `None` for direct.
    pub fn egress_seen(&self) -> Vec<Option<String>> {
        self.state.egress_seen.read().unwrap().clone()
    }
}

#[async_trait]
impl SiteAdapter for MockAdapter {
    fn target(&self) -> Target {
        self.target
    }

    async fn open(
        &self,
        egress: Option<&EgressIdentity>,
        _options: &ContextOptions,
    ) -> ExtractionResult<Box<dyn SiteSession>> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state
            .egress_seen
            .write()
            .unwrap()
            .push(egress.map(|e| e.endpoint()));

        if let Some(error) = &self.open_error {
            return Err(ExtractionError::Setup(error.clone()));
        }

        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MockSession {
            target: self.target,
            steps: self.steps.clone(),
            gate: self.gate.clone(),
            dedup: ProviderDedup::new(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    target: Target,
    steps: Vec<MockStep>,
    gate: Option<Arc<Semaphore>>,
    dedup: ProviderDedup,
    state: Arc<MockAdapterState>,
}

#[async_trait]
impl SiteSession for MockSession {
    fn search<'a>(&'a mut self, query: &'a SearchQuery) -> PageStream<'a> {
        Box::pin(stream! {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }

            let budget = query.page_budget() as usize;
            let steps = self.steps.clone();
            for (i, step) in steps.into_iter().take(budget).enumerate() {
                let page_number = i as u32 + 1;
                let url = format!("{}/mock?page={}", self.target.base_url(), page_number);
                match step {
                    MockStep::Page(records) => {
                        let records = self.dedup.filter(records);
                        yield Ok(PageOutcome::Scraped { page_number, url, records });
                    }
                    MockStep::FailedPage(error) => {
                        yield Ok(PageOutcome::Failed { page_number, url, error });
                    }
                    MockStep::Fatal(error) => {
                        yield Err(ExtractionError::Fatal(error));
                        return;
                    }
                    MockStep::Panic(message) => panic!("{}", message),
                }
            }
        })
    }

    async fn close(self: Box<Self>) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A notifier that records every event, optionally failing each call.
#[derive(Default)]
pub struct RecordingNotifier {
    events: RwLock<Vec<SessionEvent>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record events but report every delivery as failed.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Sleep before recording, to exercise the notify timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.read().unwrap().clone()
    }

    /// Event kinds in delivery order, e.g. `["started", "completed"]`.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &SessionEvent) -> Result<(), NotifyError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.write().unwrap().push(event.clone());
        if self.fail {
            return Err(NotifyError("mock delivery failure".to_string()));
        }
        Ok(())
    }
}

/// A health probe with scripted results per identity id.
pub struct ScriptedProbe {
    default_healthy: bool,
    unhealthy: RwLock<HashSet<i64>>,
    healthy: RwLock<HashSet<i64>>,
    probes: AtomicUsize,
}

impl ScriptedProbe {
    /// Every identity passes unless marked unhealthy.
    pub fn all_healthy() -> Self {
        Self::with_default(true)
    }

    /// Every identity fails unless marked healthy.
    pub fn all_unhealthy() -> Self {
        Self::with_default(false)
    }

    fn with_default(default_healthy: bool) -> Self {
        Self {
            default_healthy,
            unhealthy: RwLock::new(HashSet::new()),
            healthy: RwLock::new(HashSet::new()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_unhealthy(&self, id: i64) {
        self.healthy.write().unwrap().remove(&id);
        self.unhealthy.write().unwrap().insert(id);
    }

    pub fn set_healthy(&self, id: i64) {
        self.unhealthy.write().unwrap().remove(&id);
        self.healthy.write().unwrap().insert(id);
    }

    /// Total probes issued.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, identity: &EgressIdentity) -> ProbeReport {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let healthy = if self.unhealthy.read().unwrap().contains(&identity.id) {
            false
        } else if self.healthy.read().unwrap().contains(&identity.id) {
            true
        } else {
            self.default_healthy
        };

        if healthy {
            ProbeReport::Healthy {
                latency: Duration::from_millis(5),
                observed_ip: Some("203.0.113.1".to_string()),
            }
        } else {
            ProbeReport::Unhealthy {
                reason: "HTTP 407".to_string(),
            }
        }
    }
}

/// A `MemoryStore` wrapper that starts failing on cue.
pub struct FlakyStore {
    inner: MemoryStore,
    saves_before_failure: Option<usize>,
    saves: AtomicUsize,
    fail_status: Option<SessionStatus>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            saves_before_failure: None,
            saves: AtomicUsize::new(0),
            fail_status: None,
        }
    }

    /// Allow `n` record saves, then fail every save.
    pub fn failing_after_saves(mut self, n: usize) -> Self {
        self.saves_before_failure = Some(n);
        self
    }

    /// Fail every status update that moves a session to `status`.
    pub fn failing_status(mut self, status: SessionStatus) -> Self {
        self.fail_status = Some(status);
        self
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn create_session(&self, target: Target, query: &SearchQuery) -> StoreResult<Session> {
        self.inner.create_session(target, query).await
    }

    async fn update_session_status(
        &self,
        id: SessionId,
        update: SessionUpdate,
    ) -> StoreResult<Session> {
        if self.fail_status == Some(update.status) {
            return Err(StoreError::Backend("mock status write failure".into()));
        }
        self.inner.update_session_status(id, update).await
    }

    async fn save_record(
        &self,
        session_id: SessionId,
        page_number: u32,
        record: &ExtractedRecord,
    ) -> StoreResult<RecordId> {
        let attempt = self.saves.fetch_add(1, Ordering::SeqCst);
        if self.saves_before_failure.is_some_and(|n| attempt >= n) {
            return Err(StoreError::Backend("mock disk full".into()));
        }
        self.inner.save_record(session_id, page_number, record).await
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        self.inner.get_session(id).await
    }

    async fn list_records(&self, session_id: SessionId) -> StoreResult<Vec<StoredRecord>> {
        self.inner.list_records(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_adapter_replays_and_dedups() {
        let adapter = MockAdapter::new(Target::Doctolib)
            .with_page(vec![
                ProviderRecord::named("A").with_address("x"),
                ProviderRecord::named("a ").with_address("X"),
            ])
            .with_failed_page("timeout");

        let mut session = adapter.open(None, &ContextOptions::default()).await.unwrap();
        let query = SearchQuery::new("Kardiologe", "Berlin").with_max_pages(5);
        let pages: Vec<_> = session.search(&query).collect().await;
        session.close().await;

        assert_eq!(pages.len(), 2);
        match &pages[0] {
            Ok(PageOutcome::Scraped { records, .. }) => assert_eq!(records.len(), 1),
            other => panic!("unexpected {:?}", other.as_ref().map(|p| p.page_number())),
        }
        assert!(matches!(pages[1], Ok(PageOutcome::Failed { page_number: 2, .. })));
        assert_eq!(adapter.open_count(), 1);
        assert_eq!(adapter.close_count(), 1);
        assert_eq!(adapter.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_mock_adapter_respects_budget() {
        let adapter = MockAdapter::new(Target::Jameda)
            .with_page(vec![ProviderRecord::named("A")])
            .with_page(vec![ProviderRecord::named("B")])
            .with_page(vec![ProviderRecord::named("C")]);
        let mut session = adapter.open(None, &ContextOptions::default()).await.unwrap();
        let query = SearchQuery::new("x", "y").with_max_pages(2);
        assert_eq!(session.search(&query).count().await, 2);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_after_n_saves() {
        let store = FlakyStore::new().failing_after_saves(1);
        let session = store
            .create_session(Target::Jameda, &SearchQuery::new("x", "y"))
            .await
            .unwrap();
        let record = crate::pipeline::normalize(ProviderRecord::named("A"));
        assert!(store.save_record(session.id, 1, &record).await.is_ok());
        assert!(store.save_record(session.id, 1, &record).await.is_err());
        assert_eq!(store.list_records(session.id).await.unwrap().len(), 1);
    }
}
