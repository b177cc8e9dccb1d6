//! SQLite storage implementation.
//!
//! A file-based storage backend using SQLite. Good for:
//! - Local development
//! - Single-server deployments
//! - Keeping session results between runs of the binary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use super::validate_update;
use crate::error::{StoreError, StoreResult};
use crate::traits::store::{IdentitySource, RecordStore};
use crate::types::{
    identity::EgressIdentity,
    record::{ExtractedRecord, RecordId, StoredRecord},
    session::{SearchQuery, Session, SessionCounters, SessionId, SessionUpdate},
    target::Target,
};

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string().into())
}

/// SQLite-backed record store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://./scrape.db?mode=rwc` - File-based, create if missing
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Uses a single connection since every in-memory connection is its
    /// own database.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scraping_sessions (
                id TEXT PRIMARY KEY,
                target TEXT NOT NULL,
                query TEXT NOT NULL,
                status TEXT NOT NULL,
                pages_scraped INTEGER NOT NULL DEFAULT 0,
                total_records INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_status ON scraping_sessions(status);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extracted_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES scraping_sessions(id),
                page_number INTEGER NOT NULL,
                record TEXT NOT NULL,
                confidence_score REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_session ON extracted_records(session_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS proxy_servers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT,
                password TEXT,
                protocol TEXT NOT NULL DEFAULT 'http',
                country TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a proxy in `proxy_servers`. Returns its id.
    pub async fn add_proxy_server(&self, proxy_url: &str, country: Option<&str>) -> StoreResult<i64> {
        let parsed = EgressIdentity::parse(0, proxy_url).map_err(backend)?;
        let result = sqlx::query(
            "INSERT INTO proxy_servers (host, port, username, password, protocol, country) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&parsed.host)
        .bind(parsed.port as i64)
        .bind(&parsed.username)
        .bind(
            parsed
                .password
                .as_ref()
                .map(|p| secrecy::ExposeSecret::expose_secret(p).to_string()),
        )
        .bind(parsed.protocol.scheme())
        .bind(country)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.last_insert_rowid())
    }

    /// Exclude a proxy from future pool loads.
    pub async fn deactivate_proxy_server(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE proxy_servers SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    target: String,
    query: String,
    status: String,
    pages_scraped: i64,
    total_records: i64,
    error_count: i64,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
}

fn parse_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| backend(format!("Invalid date: {}", e)))?
        .with_timezone(&Utc))
}

fn parse_optional_time(raw: Option<&str>) -> StoreResult<Option<DateTime<Utc>>> {
    raw.map(parse_time).transpose()
}

fn parse_session_id(raw: &str) -> StoreResult<SessionId> {
    uuid::Uuid::parse_str(raw)
        .map(SessionId::from_uuid)
        .map_err(|e| backend(format!("Invalid session id: {}", e)))
}

impl SessionRow {
    fn into_session(self) -> StoreResult<Session> {
        let query: SearchQuery = serde_json::from_str(&self.query)
            .map_err(|e| backend(format!("Invalid query JSON: {}", e)))?;
        let target: Target = self.target.parse().map_err(backend)?;
        let status = self.status.parse().map_err(backend)?;

        Ok(Session {
            id: parse_session_id(&self.id)?,
            target,
            query,
            status,
            counters: SessionCounters {
                pages_scraped: self.pages_scraped as u32,
                total_records: self.total_records as u32,
                error_count: self.error_count as u32,
            },
            created_at: parse_time(&self.created_at)?,
            started_at: parse_optional_time(self.started_at.as_deref())?,
            completed_at: parse_optional_time(self.completed_at.as_deref())?,
            error: self.error,
        })
    }
}

#[derive(Debug, FromRow)]
struct RecordRow {
    id: i64,
    session_id: String,
    page_number: i64,
    record: String,
    created_at: String,
}

impl RecordRow {
    fn into_stored(self) -> StoreResult<StoredRecord> {
        let record: ExtractedRecord = serde_json::from_str(&self.record)
            .map_err(|e| backend(format!("Invalid record JSON: {}", e)))?;
        Ok(StoredRecord {
            id: self.id,
            session_id: parse_session_id(&self.session_id)?,
            page_number: self.page_number as u32,
            record,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProxyRow {
    id: i64,
    host: String,
    port: i64,
    username: Option<String>,
    password: Option<String>,
    protocol: String,
    country: Option<String>,
}

impl ProxyRow {
    fn into_identity(self) -> StoreResult<EgressIdentity> {
        let port = u16::try_from(self.port).map_err(|_| backend(format!("Invalid port: {}", self.port)))?;
        let protocol = self.protocol.parse().map_err(backend)?;
        let mut identity = EgressIdentity::new(self.id, self.host, port).with_protocol(protocol);
        if let Some(username) = self.username {
            identity = identity.with_credentials(username, self.password.unwrap_or_default());
        }
        if let Some(country) = self.country {
            identity = identity.with_country(country);
        }
        Ok(identity)
    }
}

const SESSION_COLUMNS: &str = "id, target, query, status, pages_scraped, total_records, error_count, created_at, started_at, completed_at, error";

impl SqliteStore {
    async fn fetch_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM scraping_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(SessionRow::into_session).transpose()
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_session(&self, target: Target, query: &SearchQuery) -> StoreResult<Session> {
        let session = Session::new(target, query.clone());
        let query_json = serde_json::to_string(&session.query).map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO scraping_sessions (id, target, query, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(target.as_str())
        .bind(&query_json)
        .bind(session.status.as_str())
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(session)
    }

    async fn update_session_status(
        &self,
        id: SessionId,
        update: SessionUpdate,
    ) -> StoreResult<Session> {
        let mut session = self
            .fetch_session(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        validate_update(&session, &update)?;
        let previous = session.status;
        session.apply(&update, Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE scraping_sessions SET
                status = ?,
                pages_scraped = ?,
                total_records = ?,
                error_count = ?,
                started_at = ?,
                completed_at = ?,
                error = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(session.status.as_str())
        .bind(session.counters.pages_scraped as i64)
        .bind(session.counters.total_records as i64)
        .bind(session.counters.error_count as i64)
        .bind(session.started_at.map(|t| t.to_rfc3339()))
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .bind(&session.error)
        .bind(id.to_string())
        .bind(previous.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        // status moved underneath us
        if result.rows_affected() == 0 {
            let current = self
                .fetch_session(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: update.status,
            });
        }

        Ok(session)
    }

    async fn save_record(
        &self,
        session_id: SessionId,
        page_number: u32,
        record: &ExtractedRecord,
    ) -> StoreResult<RecordId> {
        let record_json = serde_json::to_string(record).map_err(backend)?;

        let result = sqlx::query(
            r#"
            INSERT INTO extracted_records (session_id, page_number, record, confidence_score, created_at)
            SELECT id, ?, ?, ?, ? FROM scraping_sessions WHERE id = ?
            "#,
        )
        .bind(page_number as i64)
        .bind(&record_json)
        .bind(record.confidence_score)
        .bind(Utc::now().to_rfc3339())
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(result.last_insert_rowid())
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        self.fetch_session(id).await
    }

    async fn list_records(&self, session_id: SessionId) -> StoreResult<Vec<StoredRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT id, session_id, page_number, record, created_at FROM extracted_records WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(RecordRow::into_stored).collect()
    }
}

#[async_trait]
impl IdentitySource for SqliteStore {
    async fn list_active_identities(&self) -> StoreResult<Vec<EgressIdentity>> {
        let rows = sqlx::query_as::<_, ProxyRow>(
            "SELECT id, host, port, username, password, protocol, country FROM proxy_servers WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(ProxyRow::into_identity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::normalize;
    use crate::types::record::ProviderRecord;
    use crate::types::session::SessionStatus;

    #[tokio::test]
    async fn test_session_roundtrip_and_records() {
        let store = SqliteStore::in_memory().await.unwrap();
        let query = SearchQuery::new("Kardiologe", "Berlin").with_max_pages(2);
        let session = store.create_session(Target::Doctolib, &query).await.unwrap();

        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.query, query);
        assert_eq!(loaded.status, SessionStatus::Pending);

        store
            .update_session_status(session.id, SessionUpdate::status(SessionStatus::Running))
            .await
            .unwrap();

        let record = normalize(
            ProviderRecord::named("Dr. Eva Klein").with_address("Friedrichstr. 100, 10117 Berlin"),
        );
        store.save_record(session.id, 1, &record).await.unwrap();

        let counters = SessionCounters {
            pages_scraped: 1,
            total_records: 1,
            error_count: 0,
        };
        store
            .update_session_status(
                session.id,
                SessionUpdate::status(SessionStatus::Completed).with_counters(counters),
            )
            .await
            .unwrap();

        let done = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.counters, counters);
        assert!(done.started_at.is_some() && done.completed_at.is_some());

        let records = store.list_records(session.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record, record);
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let store = SqliteStore::in_memory().await.unwrap();
        let session = store
            .create_session(Target::Jameda, &SearchQuery::new("Zahnarzt", "Hamburg"))
            .await
            .unwrap();
        let err = store
            .update_session_status(session.id, SessionUpdate::status(SessionStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_racing_terminal_updates_only_one_wins() {
        let store = SqliteStore::in_memory().await.unwrap();
        let session = store
            .create_session(Target::Doctolib, &SearchQuery::new("x", "y"))
            .await
            .unwrap();
        store
            .update_session_status(session.id, SessionUpdate::status(SessionStatus::Running))
            .await
            .unwrap();

        let (completed, failed) = tokio::join!(
            store.update_session_status(session.id, SessionUpdate::status(SessionStatus::Completed)),
            store.update_session_status(
                session.id,
                SessionUpdate::status(SessionStatus::Failed).with_error("boom"),
            ),
        );

        let stored = store.get_session(session.id).await.unwrap().unwrap();
        match (completed, failed) {
            (Ok(won), Err(StoreError::InvalidTransition { from, .. }))
            | (Err(StoreError::InvalidTransition { from, .. }), Ok(won)) => {
                assert_eq!(stored.status, won.status);
                assert_eq!(from, won.status);
            }
            (a, b) => panic!(
                "expected exactly one winner, got {:?} and {:?}",
                a.map(|s| s.status),
                b.map(|s| s.status)
            ),
        }
    }

    #[tokio::test]
    async fn test_save_record_for_unknown_session() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = normalize(ProviderRecord::named("X"));
        let err = store.save_record(SessionId::new(), 1, &record).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_active_proxy_servers() {
        let store = SqliteStore::in_memory().await.unwrap();
        let keep = store
            .add_proxy_server("http://user:pw@10.0.0.1:3128", Some("DE"))
            .await
            .unwrap();
        let drop = store.add_proxy_server("socks5://10.0.0.2:1080", None).await.unwrap();
        store.deactivate_proxy_server(drop).await.unwrap();

        let identities = store.list_active_identities().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].id, keep);
        assert_eq!(identities[0].country.as_deref(), Some("DE"));
        assert_eq!(identities[0].proxy_url(), "http://user:pw@10.0.0.1:3128");
        assert!(!identities[0].healthy);
    }
}
