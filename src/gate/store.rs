//! Identity lookups and the append-only entry log.
//!
//! The core consumes identities read-only; enrollment and expiry changes
//! happen elsewhere. Both contracts are traits so the engine can be
//! exercised with in-memory fakes; [`PgAccessStore`] is the production
//! implementation over `PostgreSQL` (see `sql/schema.sql`).

use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tracing::{info_span, Instrument};

use crate::gate::biometric::Embedding;

#[derive(Debug, Clone)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub expire_time: Option<DateTime<Utc>>,
    pub embedding: Option<Embedding>,
}

impl Identity {
    /// An identity with no `expire_time` never expires.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time.is_some_and(|expiry| expiry < now)
    }
}

/// One verification attempt and its outcome; written exactly once per
/// attempt and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub subject_id: i64,
    pub access_granted: bool,
    pub error_log: Option<String>,
    pub similarity: Option<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub trait IdentityStore: Send + Sync {
    /// Look up an identity by its id.
    fn identity<'a>(
        &'a self,
        subject_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Identity>, StoreError>> + Send + 'a>>;

    /// Look up an identity by its login email (used by the login flow, not
    /// by the entry-decision pipeline).
    fn identity_by_login<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Identity>, StoreError>> + Send + 'a>>;
}

pub trait AuditSink: Send + Sync {
    /// Append one record to the entry log.
    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

/// `PostgreSQL`-backed identity store and audit sink.
#[derive(Debug, Clone)]
pub struct PgAccessStore {
    pool: PgPool,
}

impl PgAccessStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_identity(row: &sqlx::postgres::PgRow) -> Result<Identity, StoreError> {
    let embedding: Option<Json<Embedding>> = row.try_get("embedding")?;

    Ok(Identity {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        expire_time: row.try_get("expire_time")?,
        embedding: embedding.map(|Json(vector)| vector),
    })
}

impl IdentityStore for PgAccessStore {
    fn identity<'a>(
        &'a self,
        subject_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Identity>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let query = "SELECT id, email, expire_time, embedding FROM identities WHERE id = $1";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query
            );
            let row = sqlx::query(query)
                .bind(subject_id)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            row_to_identity(&row).map(Some)
        })
    }

    fn identity_by_login<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Identity>, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let query =
                "SELECT id, email, expire_time, embedding FROM identities WHERE email = $1";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query
            );
            let row = sqlx::query(query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            row_to_identity(&row).map(Some)
        })
    }
}

impl AuditSink for PgAccessStore {
    fn append<'a>(
        &'a self,
        record: &'a AuditRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let query = "INSERT INTO entry_logs \
                         (subject_id, access_granted, error_log, similarity, created_at) \
                         VALUES ($1, $2, $3, $4, $5)";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(record.subject_id)
                .bind(record.access_granted)
                .bind(record.error_log.as_deref())
                .bind(record.similarity)
                .bind(record.created_at)
                .execute(&self.pool)
                .instrument(span)
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
    use std::time::Duration;

    fn identity(expire_time: Option<DateTime<Utc>>) -> Identity {
        Identity {
            id: 7,
            email: "worker@example.test".to_string(),
            expire_time,
            embedding: None,
        }
    }

    fn unreachable_pool() -> PgPool {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("invalid")
            .database("invalid")
            .ssl_mode(PgSslMode::Disable);
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy_with(options)
    }

    #[test]
    fn identity_without_expiry_never_expires() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid");
        assert!(!identity(None).is_expired(now));
    }

    #[test]
    fn identity_expiry_is_strict() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid");
        assert!(identity(Some(now - chrono::Duration::seconds(1))).is_expired(now));
        assert!(!identity(Some(now)).is_expired(now));
        assert!(!identity(Some(now + chrono::Duration::seconds(1))).is_expired(now));
    }

    #[tokio::test]
    async fn identity_lookup_surfaces_db_failure() {
        let store = PgAccessStore::new(unreachable_pool());
        let result = store.identity(7).await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn login_lookup_surfaces_db_failure() {
        let store = PgAccessStore::new(unreachable_pool());
        let result = store.identity_by_login("worker@example.test").await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn append_surfaces_db_failure() {
        let store = PgAccessStore::new(unreachable_pool());
        let record = AuditRecord {
            subject_id: 7,
            access_granted: false,
            error_log: Some("Invalid or expired QR token".to_string()),
            similarity: None,
            created_at: Utc::now(),
        };
        let result = store.append(&record).await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }
}
