//! Integration tests for the session lifecycle.
//!
//! These drive the orchestrator end to end with mock adapters:
//! 1. Admission (rate limits, bans, concurrency caps)
//! 2. Egress selection
//! 3. Page draining and persistence
//! 4. Finalization and notification

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use scrape_engine::{
    testing::{FlakyStore, MockAdapter, RecordingNotifier, ScriptedProbe},
    AdapterRegistry, AdmissionError, EgressIdentity, EgressPool, EngineConfig, EngineError,
    MemoryStore, Orchestrator, ProviderRecord, RecordStore, RotationStrategy, SearchQuery,
    SessionRequest, SessionStatus, Target,
};

/// Helper to build a query that never sleeps between pages.
fn query(max_pages: u32) -> SearchQuery {
    SearchQuery::new("Kardiologe", "Berlin")
        .with_max_pages(max_pages)
        .with_delay_seconds(0)
}

fn request(target: Target, max_pages: u32) -> SessionRequest {
    SessionRequest::new(target, query(max_pages), "198.51.100.7")
}

fn pool(probe: ScriptedProbe) -> EgressPool {
    EgressPool::new(Arc::new(probe), Duration::from_secs(300))
}

/// Helper to set up an orchestrator around one mock adapter.
fn setup(
    config: EngineConfig,
    adapter: MockAdapter,
    store: Arc<dyn RecordStore>,
    notifier: Arc<RecordingNotifier>,
) -> Arc<Orchestrator> {
    Arc::new(
        Orchestrator::new(config, store, pool(ScriptedProbe::all_healthy()))
            .with_adapters(AdapterRegistry::new().with_adapter(adapter))
            .with_notifier(notifier),
    )
}

fn doctolib_page() -> Vec<ProviderRecord> {
    vec![
        ProviderRecord::named("Dr. med. Eva Klein")
            .with_specialty("Kardiologin")
            .with_address("Friedrichstr. 100, 10117 Berlin")
            .with_phone("030 98765432"),
        ProviderRecord::named("dr. med. eva klein ")
            .with_address("friedrichstr. 100, 10117 berlin"),
        ProviderRecord::named("Dr. Jonas Wolf").with_address("Torstr. 5, 10119 Berlin"),
    ]
}

#[tokio::test]
async fn test_duplicate_providers_are_saved_once() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let adapter = MockAdapter::new(Target::Doctolib).with_page(doctolib_page());
    let orchestrator = setup(EngineConfig::default(), adapter, store.clone(), notifier.clone());

    // the adapter runs out of results before the two-page budget
    let report = orchestrator
        .execute(request(Target::Doctolib, 2))
        .await
        .unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.counters.pages_scraped, 1);
    assert_eq!(report.counters.total_records, 2);
    assert_eq!(report.counters.error_count, 0);
    assert!(report.error.is_none());

    let records = store.list_records(report.session_id).await.unwrap();
    assert_eq!(records.len(), 2);
    let eva = &records[0].record;
    assert_eq!(eva.postal_code.as_deref(), Some("10117"));
    assert_eq!(eva.city.as_deref(), Some("Berlin"));
    assert!(eva.confidence_score > 0.0 && eva.confidence_score <= 100.0);

    let session = store.get_session(report.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.counters, report.counters);
    assert!(session.started_at.is_some());
    assert!(session.completed_at.is_some());

    assert_eq!(notifier.kinds(), vec!["started", "completed"]);
}

#[tokio::test]
async fn test_fourth_concurrent_session_rejected_without_session() {
    let store = Arc::new(MemoryStore::new());
    let gate = Arc::new(Semaphore::new(0));
    let adapter = MockAdapter::new(Target::Jameda)
        .with_page(vec![ProviderRecord::named("A")])
        .with_gate(gate.clone());
    let orchestrator = setup(
        EngineConfig::default(),
        adapter.clone(),
        store.clone(),
        Arc::new(RecordingNotifier::new()),
    );

    let mut handles = Vec::new();
    for _ in 0..3 {
        handles.push(orchestrator.submit(request(Target::Jameda, 1)).await.unwrap());
    }

    let err = orchestrator
        .submit(request(Target::Jameda, 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::AdmissionRejected(AdmissionError::TooManyConcurrentSessions {
            target: Target::Jameda,
            active: 3,
            max: 3,
        })
    ));
    assert_eq!(store.session_count(), 3);

    // other targets are capped independently
    assert!(orchestrator
        .admission()
        .gate()
        .try_start(Target::Doctolib)
        .is_ok());

    gate.add_permits(3);
    for handle in handles {
        let report = handle.wait().await.unwrap();
        assert_eq!(report.status, SessionStatus::Completed);
    }

    assert_eq!(orchestrator.admission().active_sessions(Target::Jameda), 0);
    assert!(adapter.max_active_sessions() <= 3);
    assert!(orchestrator.submit(request(Target::Jameda, 1)).await.is_ok());
}

#[tokio::test]
async fn test_requester_banned_after_exceeding_twice_the_limit() {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig::default()
        .with_rate_limit(2, 3600)
        .with_max_concurrent_sessions(10);
    let adapter = MockAdapter::new(Target::Jameda).with_page(vec![ProviderRecord::named("A")]);
    let orchestrator = setup(config, adapter, store.clone(), Arc::new(RecordingNotifier::new()));

    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.push(orchestrator.execute(request(Target::Jameda, 1)).await);
    }

    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].is_ok());
    for outcome in &outcomes[2..4] {
        assert!(matches!(
            outcome,
            Err(EngineError::AdmissionRejected(AdmissionError::RateLimited { .. }))
        ));
    }
    for outcome in &outcomes[4..] {
        match outcome {
            Err(EngineError::AdmissionRejected(AdmissionError::Banned { retry_after, .. })) => {
                assert!(*retry_after <= Duration::from_secs(3600));
                assert!(*retry_after > Duration::from_secs(3500));
            }
            other => panic!("expected ban, got {:?}", other.as_ref().map(|r| r.status)),
        }
    }

    assert_eq!(store.session_count(), 2);
    assert!(orchestrator.admission().limiter().is_banned("198.51.100.7"));

    // a different requester is unaffected
    let other = SessionRequest::new(Target::Jameda, query(1), "198.51.100.8");
    assert!(orchestrator.execute(other).await.is_ok());
}

#[tokio::test]
async fn test_persistence_failure_keeps_saved_records() {
    let store = Arc::new(FlakyStore::new().failing_after_saves(2));
    let notifier = Arc::new(RecordingNotifier::new());
    let adapter = MockAdapter::new(Target::Jameda)
        .with_page(vec![ProviderRecord::named("A"), ProviderRecord::named("B")])
        .with_page(vec![ProviderRecord::named("C"), ProviderRecord::named("D")]);
    let orchestrator = setup(
        EngineConfig::default(),
        adapter.clone(),
        store.clone(),
        notifier.clone(),
    );

    let report = orchestrator
        .execute(request(Target::Jameda, 5))
        .await
        .unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(report.counters.total_records, 2);
    assert_eq!(report.counters.pages_scraped, 1);
    assert!(report.error.as_deref().unwrap().contains("persistence failed"));

    let records = store.list_records(report.session_id).await.unwrap();
    let names: Vec<_> = records
        .iter()
        .map(|r| r.record.name.clone().unwrap())
        .collect();
    assert_eq!(names, vec!["A", "B"]);

    let session = store.get_session(report.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.error.is_some());

    assert_eq!(adapter.close_count(), 1);
    assert_eq!(orchestrator.admission().active_sessions(Target::Jameda), 0);
    assert_eq!(notifier.kinds(), vec!["started", "error"]);
}

#[tokio::test]
async fn test_completion_not_persisted_reports_failed() {
    let store = Arc::new(FlakyStore::new().failing_status(SessionStatus::Completed));
    let adapter = MockAdapter::new(Target::Jameda).with_page(vec![ProviderRecord::named("A")]);
    let orchestrator = setup(
        EngineConfig::default(),
        adapter,
        store.clone(),
        Arc::new(RecordingNotifier::new()),
    );

    let report = orchestrator
        .execute(request(Target::Jameda, 1))
        .await
        .unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    let session = store.get_session(report.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(store.list_records(report.session_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_setup_failure_goes_from_pending_to_failed() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let adapter = MockAdapter::new(Target::Doctolib).failing_open("browser launch failed");
    let orchestrator = setup(
        EngineConfig::default(),
        adapter.clone(),
        store.clone(),
        notifier.clone(),
    );

    let report = orchestrator
        .execute(request(Target::Doctolib, 3))
        .await
        .unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    assert!(report.error.as_deref().unwrap().contains("browser launch failed"));
    assert_eq!(report.counters.pages_scraped, 0);

    let session = store.get_session(report.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.started_at.is_none());
    assert!(session.completed_at.is_some());

    assert_eq!(adapter.close_count(), 0);
    assert_eq!(orchestrator.admission().active_sessions(Target::Doctolib), 0);
    assert_eq!(notifier.kinds(), vec!["error"]);
}

#[tokio::test]
async fn test_fatal_error_mid_stream_keeps_partial_results() {
    let store = Arc::new(MemoryStore::new());
    let adapter = MockAdapter::new(Target::Jameda)
        .with_page(vec![ProviderRecord::named("A")])
        .with_failed_page("HTTP 503")
        .with_fatal("captcha wall")
        .with_page(vec![ProviderRecord::named("never")]);
    let orchestrator = setup(
        EngineConfig::default(),
        adapter.clone(),
        store.clone(),
        Arc::new(RecordingNotifier::new()),
    );

    let report = orchestrator
        .execute(request(Target::Jameda, 10))
        .await
        .unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(report.counters.pages_scraped, 1);
    assert_eq!(report.counters.error_count, 1);
    assert_eq!(report.counters.total_records, 1);
    assert!(report.error.as_deref().unwrap().contains("captcha wall"));

    let session = store.get_session(report.session_id).await.unwrap().unwrap();
    assert!(session.started_at.is_some());
    assert_eq!(session.counters, report.counters);
    assert_eq!(store.list_records(report.session_id).await.unwrap().len(), 1);
    assert_eq!(adapter.close_count(), 1);
}

#[tokio::test]
async fn test_adapter_panic_fails_session() {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let adapter = MockAdapter::new(Target::Jameda)
        .with_page(vec![ProviderRecord::named("A")])
        .with_panic("selector table corrupted");
    let orchestrator = setup(
        EngineConfig::default(),
        adapter,
        store.clone(),
        notifier.clone(),
    );

    let report = orchestrator
        .execute(request(Target::Jameda, 5))
        .await
        .unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    let error = report.error.as_deref().unwrap();
    assert!(error.contains("panicked"));
    assert!(error.contains("selector table corrupted"));
    assert_eq!(report.counters.pages_scraped, 1);

    let session = store.get_session(report.session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.completed_at.is_some());
    assert_eq!(store.list_records(report.session_id).await.unwrap().len(), 1);

    assert_eq!(orchestrator.admission().active_sessions(Target::Jameda), 0);
    assert_eq!(notifier.kinds(), vec!["started", "error"]);
}

#[tokio::test]
async fn test_notifier_failures_do_not_affect_outcome() {
    let failing = Arc::new(RecordingNotifier::failing());
    let adapter = MockAdapter::new(Target::Jameda).with_page(vec![ProviderRecord::named("A")]);
    let orchestrator = setup(
        EngineConfig::default(),
        adapter.clone(),
        Arc::new(MemoryStore::new()),
        failing.clone(),
    );
    let report = orchestrator
        .execute(request(Target::Jameda, 1))
        .await
        .unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(failing.kinds(), vec!["started", "completed"]);

    let mut config = EngineConfig::default();
    config.notify_timeout_seconds = 1;
    let slow = Arc::new(RecordingNotifier::new().with_delay(Duration::from_secs(30)));
    let orchestrator = setup(config, adapter, Arc::new(MemoryStore::new()), slow.clone());

    tokio::time::pause();
    let report = orchestrator
        .execute(request(Target::Jameda, 1))
        .await
        .unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert!(slow.events().is_empty());
}

#[tokio::test]
async fn test_sessions_rotate_through_healthy_proxies() {
    let probe = Arc::new(ScriptedProbe::all_healthy());
    probe.set_unhealthy(2);
    let egress = EgressPool::new(probe.clone(), Duration::from_secs(300));
    let identities: Vec<EgressIdentity> = (1..=3)
        .map(|id| EgressIdentity::new(id, format!("10.0.0.{}", id), 3128))
        .collect();
    egress.initialize(&identities).await.unwrap();
    let stats = egress.health_check_all().await;
    assert_eq!(stats.healthy, 2);
    assert_eq!(stats.unhealthy, 1);

    let adapter = MockAdapter::new(Target::Jameda).with_page(vec![ProviderRecord::named("A")]);
    let orchestrator = Arc::new(
        Orchestrator::new(EngineConfig::default(), Arc::new(MemoryStore::new()), egress)
            .with_adapters(AdapterRegistry::new().with_adapter(adapter.clone()))
            .with_notifier(Arc::new(RecordingNotifier::new())),
    );

    for _ in 0..4 {
        let query = query(1).with_proxy(RotationStrategy::RoundRobin);
        let report = orchestrator
            .execute(SessionRequest::new(Target::Jameda, query, "k"))
            .await
            .unwrap();
        assert_eq!(report.status, SessionStatus::Completed);
    }

    let seen: Vec<String> = adapter.egress_seen().into_iter().flatten().collect();
    assert_eq!(
        seen,
        vec!["10.0.0.1:3128", "10.0.0.3:3128", "10.0.0.1:3128", "10.0.0.3:3128"]
    );

    let usage: Vec<u64> = orchestrator
        .egress()
        .identities()
        .iter()
        .map(|i| i.usage_count)
        .collect();
    assert_eq!(usage, vec![2, 0, 2]);
}
