//! Session pipeline: normalization and orchestration.

pub mod normalize;
pub mod orchestrator;

pub use normalize::{confidence_score, normalize};
pub use orchestrator::{Orchestrator, SessionHandle};
