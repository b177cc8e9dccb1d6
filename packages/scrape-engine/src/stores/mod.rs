//! Record store implementations.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage (always available)
//! - `SqliteStore` - SQLite file-based storage (requires `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::error::{StoreError, StoreResult};
use crate::types::session::{Session, SessionUpdate};

/// Reject lifecycle edges outside `pending -> running -> {completed|failed}`
/// and counter decreases.
pub(crate) fn validate_update(session: &Session, update: &SessionUpdate) -> StoreResult<()> {
    if !session.status.can_transition_to(update.status) {
        return Err(StoreError::InvalidTransition {
            from: session.status,
            to: update.status,
        });
    }
    if let Some(counters) = &update.counters {
        if !session.counters.is_superseded_by(counters) {
            return Err(StoreError::CounterRegression(session.id.to_string()));
        }
    }
    Ok(())
}
