//! Seams between the orchestrator and its collaborators.

pub mod adapter;
pub mod notifier;
pub mod probe;
pub mod store;

pub use adapter::{ContextOptions, PageOutcome, PageStream, SiteAdapter, SiteSession};
pub use notifier::{LogNotifier, Notifier, SessionEvent};
pub use probe::{HealthProbe, ProbeReport};
pub use store::{IdentitySource, RecordStore};
