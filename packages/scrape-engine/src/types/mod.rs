//! Core data types.

pub mod config;
pub mod identity;
pub mod record;
pub mod session;
pub mod target;

pub use config::EngineConfig;
pub use identity::{EgressIdentity, ProxyProtocol, RotationStrategy};
pub use record::{ExtractedRecord, ProviderRecord, RecordId, StoredRecord};
pub use session::{
    SearchQuery, Session, SessionCounters, SessionId, SessionReport, SessionRequest,
    SessionStatus, SessionUpdate,
};
pub use target::Target;
