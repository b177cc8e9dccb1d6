//! Persistence traits for sessions, records and egress identities.
//!
//! The record store is the system of record once a session finalizes.
//! Each record save is independently durable; there is no batching.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{
    identity::EgressIdentity,
    record::{ExtractedRecord, RecordId, StoredRecord},
    session::{SearchQuery, Session, SessionId, SessionUpdate},
    target::Target,
};

/// Durable storage for sessions and their records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a session in `pending` state.
    async fn create_session(&self, target: Target, query: &SearchQuery) -> StoreResult<Session>;

    /// Apply a status change.
    ///
    /// Fails with `InvalidTransition` for edges outside the lifecycle and
    /// with `CounterRegression` if any counter would decrease.
    async fn update_session_status(
        &self,
        id: SessionId,
        update: SessionUpdate,
    ) -> StoreResult<Session>;

    /// Persist one normalized record.
    async fn save_record(
        &self,
        session_id: SessionId,
        page_number: u32,
        record: &ExtractedRecord,
    ) -> StoreResult<RecordId>;

    /// Get a session by id.
    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>>;

    /// All records saved for a session, in save order.
    async fn list_records(&self, session_id: SessionId) -> StoreResult<Vec<StoredRecord>>;
}

/// Backing store for egress identities, read once at pool initialization.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Identities flagged active. Health fields are ignored by the pool.
    async fn list_active_identities(&self) -> StoreResult<Vec<EgressIdentity>>;
}

/// Fixed identity list, e.g. parsed from `EGRESS_PROXIES`.
#[async_trait]
impl IdentitySource for Vec<EgressIdentity> {
    async fn list_active_identities(&self) -> StoreResult<Vec<EgressIdentity>> {
        Ok(self.clone())
    }
}
