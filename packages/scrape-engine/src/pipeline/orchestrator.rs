//! Session orchestrator.
//!
//! Ties admission, egress, adapters, normalization and persistence
//! together for one session:
//!
//! ```text
//! admit -> create (pending) -> acquire egress -> open context
//!       -> running -> drain pages (normalize, score, save)
//!       -> completed | failed -> close context -> release slot -> notify
//! ```
//!
//! Admission rejections happen before a session exists. Context
//! acquisition failures go straight from `pending` to `failed`. Page
//! failures only bump the error counter. Any other adapter or store error
//! fails the session; records saved before it stay saved.

use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::adapters::AdapterRegistry;
use crate::admission::{AdmissionController, SessionSlot};
use crate::egress::EgressPool;
use crate::error::{EngineError, Result};
use crate::pipeline::normalize::normalize;
use crate::traits::adapter::{ContextOptions, PageOutcome, SiteSession};
use crate::traits::notifier::{LogNotifier, Notifier, SessionEvent};
use crate::traits::store::RecordStore;
use crate::types::{
    config::EngineConfig,
    identity::EgressIdentity,
    record::StoredRecord,
    session::{
        SearchQuery, Session, SessionCounters, SessionId, SessionReport, SessionRequest,
        SessionStatus, SessionUpdate,
    },
    target::Target,
};

/// A scheduled session.
#[derive(Debug)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub target: Target,
    join: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Wait for the session to reach a terminal state.
    pub async fn wait(self) -> Result<SessionReport> {
        Ok(self.join.await?)
    }
}

/// Runs scraping sessions under admission control.
pub struct Orchestrator {
    config: EngineConfig,
    admission: AdmissionController,
    egress: EgressPool,
    adapters: AdapterRegistry,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in adapters and a logging notifier.
    pub fn new(config: EngineConfig, store: Arc<dyn RecordStore>, egress: EgressPool) -> Self {
        Self {
            admission: AdmissionController::new(&config),
            config,
            egress,
            adapters: AdapterRegistry::with_defaults(),
            store,
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Replace the adapter registry.
    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Replace the notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn egress(&self) -> &EgressPool {
        &self.egress
    }

    /// Admit a request, create its session and schedule it.
    ///
    /// Fails without creating a session if the target has no adapter or
    /// admission rejects the request.
    pub async fn submit(self: &Arc<Self>, request: SessionRequest) -> Result<SessionHandle> {
        let target = request.target;
        if self.adapters.get(target).is_none() {
            return Err(EngineError::UnsupportedTarget(target.to_string()));
        }

        let slot = self.admission.admit(&request.requester, target)?;
        let session = self.store.create_session(target, &request.query).await?;
        let session_id = session.id;

        info!(
            session_id = %session_id,
            target = %target,
            requester = %request.requester,
            specialty = %request.query.specialty,
            city = %request.query.city,
            max_pages = request.query.page_budget(),
            "Session scheduled"
        );

        let this = Arc::clone(self);
        let span = info_span!("session", session_id = %session_id, target = %target);
        let join = tokio::spawn(
            async move { this.supervise(session, slot).await }.instrument(span),
        );

        Ok(SessionHandle {
            session_id,
            target,
            join,
        })
    }

    /// Submit and wait for the terminal report.
    pub async fn execute(self: &Arc<Self>, request: SessionRequest) -> Result<SessionReport> {
        self.submit(request).await?.wait().await
    }

    /// Drive one admitted session to a terminal state.
    ///
    /// The slot is held for the whole run and released on return, on every
    /// path.
    pub async fn run_session(&self, session: Session, slot: SessionSlot) -> SessionReport {
        let _slot = slot;
        let started = Instant::now();
        let id = session.id;
        let target = session.target;
        let query = &session.query;
        let counters = SessionCounters::default();

        let Some(adapter) = self.adapters.get(target) else {
            let e = EngineError::UnsupportedTarget(target.to_string());
            return self.fail(id, target, counters, e.to_string(), started).await;
        };

        let egress = match self.acquire_egress(query) {
            Ok(egress) => egress,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session cannot start");
                return self
                    .fail(id, target, counters, e.to_string(), started)
                    .await;
            }
        };

        let options = ContextOptions::from_config(&self.config);
        let mut site = match adapter.open(egress.as_ref(), &options).await {
            Ok(site) => site,
            Err(e) => {
                error!(session_id = %id, error = %e, "Context acquisition failed");
                self.release_egress(egress.as_ref());
                let e = EngineError::from(e);
                return self
                    .fail(id, target, counters, e.to_string(), started)
                    .await;
            }
        };

        let mut counters = counters;
        let result = match self
            .store
            .update_session_status(id, SessionUpdate::status(SessionStatus::Running))
            .await
        {
            Ok(_) => {
                let proxy = egress
                    .as_ref()
                    .map(|e| e.endpoint())
                    .unwrap_or_else(|| "direct".to_string());
                info!(session_id = %id, target = %target, proxy = %proxy, "Session running");
                self.notify(&SessionEvent::Started { session_id: id, target }).await;
                self.drain(id, site.as_mut(), query, &mut counters).await
            }
            Err(e) => Err(EngineError::from(e)),
        };

        site.close().await;
        self.release_egress(egress.as_ref());

        match result {
            Ok(()) => {
                self.finalize(id, target, SessionStatus::Completed, counters, None, started)
                    .await
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "Session failed");
                self.fail(id, target, counters, e.to_string(), started).await
            }
        }
    }

    /// Run a session, failing it if the run panics.
    ///
    /// A panicking adapter would otherwise leave the stored session
    /// `running` forever.
    async fn supervise(&self, session: Session, slot: SessionSlot) -> SessionReport {
        let started = Instant::now();
        let id = session.id;
        let target = session.target;

        let outcome = AssertUnwindSafe(self.run_session(session, slot))
            .catch_unwind()
            .await;
        let payload = match outcome {
            Ok(report) => return report,
            Err(payload) => payload,
        };

        let message = format!("session task panicked: {}", panic_message(payload.as_ref()));
        error!(session_id = %id, error = %message, "Session panicked");

        match self.store.get_session(id).await {
            Ok(Some(stored)) if stored.status.is_terminal() => SessionReport {
                session_id: id,
                target,
                status: stored.status,
                counters: stored.counters,
                duration: started.elapsed(),
                error: stored.error,
            },
            Ok(Some(stored)) => self.fail(id, target, stored.counters, message, started).await,
            _ => {
                self.fail(id, target, SessionCounters::default(), message, started)
                    .await
            }
        }
    }

    /// Records saved so far for a session.
    pub async fn records(&self, session_id: SessionId) -> Result<Vec<StoredRecord>> {
        Ok(self.store.list_records(session_id).await?)
    }

    /// Current state of a session.
    pub async fn session(&self, session_id: SessionId) -> Result<Option<Session>> {
        Ok(self.store.get_session(session_id).await?)
    }

    fn acquire_egress(&self, query: &SearchQuery) -> Result<Option<EgressIdentity>> {
        if !query.use_proxy {
            return Ok(None);
        }
        match self.egress.acquire(query.rotation) {
            Some(identity) => {
                debug!(proxy = %identity.endpoint(), "Acquired egress identity");
                Ok(Some(identity))
            }
            None if self.config.require_egress => Err(EngineError::EgressUnavailable),
            None => {
                warn!("No healthy egress identity, connecting directly");
                Ok(None)
            }
        }
    }

    fn release_egress(&self, egress: Option<&EgressIdentity>) {
        if let Some(identity) = egress {
            self.egress.release(identity);
        }
    }

    /// Consume the page stream, persisting each page before the next one
    /// is requested.
    async fn drain(
        &self,
        id: SessionId,
        site: &mut dyn SiteSession,
        query: &SearchQuery,
        counters: &mut SessionCounters,
    ) -> Result<()> {
        let mut pages = site.search(query);

        while let Some(outcome) = pages.next().await {
            match outcome? {
                PageOutcome::Scraped {
                    page_number,
                    url,
                    records,
                } => {
                    let found = records.len();
                    for raw in records {
                        let record = normalize(raw);
                        self.store.save_record(id, page_number, &record).await?;
                        counters.total_records += 1;
                    }
                    counters.pages_scraped += 1;
                    info!(
                        session_id = %id,
                        page = page_number,
                        url = %url,
                        records = found,
                        "Page scraped"
                    );
                }
                PageOutcome::Failed {
                    page_number,
                    url,
                    error,
                } => {
                    counters.error_count += 1;
                    warn!(
                        session_id = %id,
                        page = page_number,
                        url = %url,
                        error = %error,
                        "Page failed"
                    );
                }
            }

            self.store
                .update_session_status(
                    id,
                    SessionUpdate::status(SessionStatus::Running).with_counters(*counters),
                )
                .await?;
        }

        Ok(())
    }

    async fn fail(
        &self,
        id: SessionId,
        target: Target,
        counters: SessionCounters,
        error: String,
        started: Instant,
    ) -> SessionReport {
        self.finalize(id, target, SessionStatus::Failed, counters, Some(error), started)
            .await
    }

    /// Write the terminal state and emit the notification.
    async fn finalize(
        &self,
        id: SessionId,
        target: Target,
        status: SessionStatus,
        counters: SessionCounters,
        error: Option<String>,
        started: Instant,
    ) -> SessionReport {
        let mut update = SessionUpdate::status(status).with_counters(counters);
        if let Some(e) = &error {
            update = update.with_error(e.clone());
        }

        let (status, error) = match self.store.update_session_status(id, update).await {
            Ok(_) => (status, error),
            Err(e) if status == SessionStatus::Completed => {
                // completed only counts once it is durable
                let message = EngineError::from(e).to_string();
                error!(session_id = %id, error = %message, "Failed to persist completion");
                let fallback = SessionUpdate::status(SessionStatus::Failed)
                    .with_counters(counters)
                    .with_error(message.clone());
                if let Err(e) = self.store.update_session_status(id, fallback).await {
                    error!(session_id = %id, error = %e, "Failed to persist failure");
                }
                (SessionStatus::Failed, Some(message))
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "Failed to persist failure");
                (status, error)
            }
        };

        let report = SessionReport {
            session_id: id,
            target,
            status,
            counters,
            duration: started.elapsed(),
            error,
        };

        info!(
            session_id = %id,
            target = %target,
            status = %status,
            pages = counters.pages_scraped,
            records = counters.total_records,
            errors = counters.error_count,
            duration_secs = report.duration.as_secs_f64(),
            "Session finished"
        );

        let event = match status {
            SessionStatus::Completed => SessionEvent::Completed(report.clone()),
            _ => SessionEvent::Error(report.clone()),
        };
        self.notify(&event).await;

        report
    }

    /// Best-effort delivery, bounded by the notify timeout. Never retried.
    async fn notify(&self, event: &SessionEvent) {
        let delivery = self.notifier.notify(event);
        match tokio::time::timeout(self.config.notify_timeout(), delivery).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    session_id = %event.session_id(),
                    event = event.kind(),
                    error = %e,
                    "Notification failed"
                );
            }
            Err(_) => {
                warn!(
                    session_id = %event.session_id(),
                    event = event.kind(),
                    "Notification timed out"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
