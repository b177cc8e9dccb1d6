//! Scraping Session Orchestration Engine
//!
//! Runs unattended scraping sessions against a fixed allow-list of
//! physician directory sites, under per-requester rate limits, per-target
//! concurrency caps and rotating outbound proxies.
//!
//! # Session Lifecycle
//!
//! ```text
//! submit ──admission──> pending ──open context──> running ──drain──> completed
//!    │                     │                         │
//!    └─ rejected           └─> failed                └─> failed
//! ```
//!
//! - Rejected requests never create a session
//! - Page failures are counted, not fatal
//! - Records saved before a failure stay saved
//! - The context and the concurrency slot are released on every path
//!
//! # Usage
//!
//! ```rust,ignore
//! use scrape_engine::{EgressPool, EngineConfig, HttpHealthProbe, MemoryStore, Orchestrator};
//! use scrape_engine::{SessionRequest, Target};
//!
//! let config = EngineConfig::from_env()?;
//! let probe = Arc::new(HttpHealthProbe::new(config.proxy_request_timeout()));
//! let egress = EgressPool::new(probe, config.health_check_interval());
//! egress.initialize(&EngineConfig::egress_proxies_from_env()?).await?;
//!
//! let orchestrator = Arc::new(Orchestrator::new(config.clone(), Arc::new(MemoryStore::new()), egress));
//! let query = config.query("Kardiologe", "Berlin").with_max_pages(2);
//! let report = orchestrator
//!     .execute(SessionRequest::new(Target::Doctolib, query, "203.0.113.9"))
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - [`types`] - Sessions, records, targets, egress identities, config
//! - [`traits`] - Seams for stores, notifiers, adapters and health probes
//! - [`admission`] - Sliding-window rate limiting and concurrency slots
//! - [`egress`] - Proxy pool with health checks and rotation
//! - [`adapters`] - Site adapters (jameda.de, doctolib.de) and their registry
//! - [`pipeline`] - Normalization, scoring and the orchestrator
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`testing`] - Mock implementations for testing

pub mod adapters;
pub mod admission;
pub mod egress;
pub mod error;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    AdmissionError, ConfigError, EngineError, ExtractionError, NotifyError, Result, StoreError,
};
pub use traits::{
    adapter::{ContextOptions, PageOutcome, PageStream, SiteAdapter, SiteSession},
    notifier::{LogNotifier, Notifier, SessionEvent},
    probe::{HealthProbe, ProbeReport},
    store::{IdentitySource, RecordStore},
};
pub use types::{
    config::EngineConfig,
    identity::{EgressIdentity, ProxyProtocol, RotationStrategy},
    record::{ExtractedRecord, ProviderRecord, RecordId, StoredRecord},
    session::{
        SearchQuery, Session, SessionCounters, SessionId, SessionReport, SessionRequest,
        SessionStatus, SessionUpdate,
    },
    target::Target,
};

pub use adapters::{AdapterRegistry, DoctolibAdapter, JamedaAdapter};
pub use admission::{AdmissionController, ConcurrencyGate, RateLimitInfo, RateLimiter, SessionSlot};
pub use egress::{EgressPool, HttpHealthProbe, PoolStats};
pub use pipeline::{confidence_score, normalize, Orchestrator, SessionHandle};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;
