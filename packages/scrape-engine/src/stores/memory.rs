//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use super::validate_update;
use crate::error::{StoreError, StoreResult};
use crate::traits::store::{IdentitySource, RecordStore};
use crate::types::{
    identity::EgressIdentity,
    record::{ExtractedRecord, RecordId, StoredRecord},
    session::{SearchQuery, Session, SessionId, SessionUpdate},
    target::Target,
};

/// In-memory storage for sessions, records and egress identities.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    records: RwLock<Vec<StoredRecord>>,
    identities: RwLock<Vec<EgressIdentity>>,
}

fn poisoned() -> StoreError {
    StoreError::Backend("memory store lock poisoned".into())
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the identities returned by `list_active_identities`.
    pub fn with_identities(self, identities: Vec<EgressIdentity>) -> Self {
        if let Ok(mut guard) = self.identities.write() {
            *guard = identities;
        }
        self
    }

    /// Number of sessions created.
    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Number of records saved across all sessions.
    pub fn record_count(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_session(&self, target: Target, query: &SearchQuery) -> StoreResult<Session> {
        let session = Session::new(target, query.clone());
        self.sessions
            .write()
            .map_err(|_| poisoned())?
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn update_session_status(
        &self,
        id: SessionId,
        update: SessionUpdate,
    ) -> StoreResult<Session> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        validate_update(session, &update)?;
        session.apply(&update, Utc::now());
        Ok(session.clone())
    }

    async fn save_record(
        &self,
        session_id: SessionId,
        page_number: u32,
        record: &ExtractedRecord,
    ) -> StoreResult<RecordId> {
        if !self
            .sessions
            .read()
            .map_err(|_| poisoned())?
            .contains_key(&session_id)
        {
            return Err(StoreError::NotFound(session_id.to_string()));
        }

        let mut records = self.records.write().map_err(|_| poisoned())?;
        let id = records.len() as RecordId + 1;
        records.push(StoredRecord {
            id,
            session_id,
            page_number,
            record: record.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().map_err(|_| poisoned())?.get(&id).cloned())
    }

    async fn list_records(&self, session_id: SessionId) -> StoreResult<Vec<StoredRecord>> {
        Ok(self
            .records
            .read()
            .map_err(|_| poisoned())?
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdentitySource for MemoryStore {
    async fn list_active_identities(&self) -> StoreResult<Vec<EgressIdentity>> {
        Ok(self.identities.read().map_err(|_| poisoned())?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::normalize;
    use crate::types::record::ProviderRecord;
    use crate::types::session::{SessionCounters, SessionStatus};

    fn query() -> SearchQuery {
        SearchQuery::new("Kardiologe", "Berlin")
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let store = MemoryStore::new();
        let session = store.create_session(Target::Doctolib, &query()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Pending);

        let running = store
            .update_session_status(session.id, SessionUpdate::status(SessionStatus::Running))
            .await
            .unwrap();
        assert!(running.started_at.is_some());

        let record = normalize(ProviderRecord::named("Dr. A"));
        let first = store.save_record(session.id, 1, &record).await.unwrap();
        let second = store.save_record(session.id, 1, &record).await.unwrap();
        assert!(second > first);

        let counters = SessionCounters {
            pages_scraped: 1,
            total_records: 2,
            error_count: 0,
        };
        let done = store
            .update_session_status(
                session.id,
                SessionUpdate::status(SessionStatus::Completed).with_counters(counters),
            )
            .await
            .unwrap();
        assert_eq!(done.counters, counters);
        assert!(done.completed_at.is_some());

        assert_eq!(store.list_records(session.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_invalid_transition() {
        let store = MemoryStore::new();
        let session = store.create_session(Target::Jameda, &query()).await.unwrap();

        let err = store
            .update_session_status(session.id, SessionUpdate::status(SessionStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        store
            .update_session_status(session.id, SessionUpdate::status(SessionStatus::Failed))
            .await
            .unwrap();
        let err = store
            .update_session_status(session.id, SessionUpdate::status(SessionStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_rejects_counter_regression() {
        let store = MemoryStore::new();
        let session = store.create_session(Target::Jameda, &query()).await.unwrap();
        let counters = SessionCounters {
            pages_scraped: 2,
            total_records: 4,
            error_count: 0,
        };
        store
            .update_session_status(
                session.id,
                SessionUpdate::status(SessionStatus::Running).with_counters(counters),
            )
            .await
            .unwrap();

        let err = store
            .update_session_status(
                session.id,
                SessionUpdate::status(SessionStatus::Running).with_counters(SessionCounters::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CounterRegression(_)));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = MemoryStore::new();
        let id = SessionId::new();
        assert!(store.get_session(id).await.unwrap().is_none());
        let record = normalize(ProviderRecord::named("X"));
        assert!(matches!(
            store.save_record(id, 1, &record).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_seeded_identities() {
        let store = MemoryStore::new().with_identities(vec![EgressIdentity::new(1, "10.0.0.1", 8080)]);
        let identities = store.list_active_identities().await.unwrap();
        assert_eq!(identities.len(), 1);
    }
}
