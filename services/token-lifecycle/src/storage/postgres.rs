//! Postgres-backed credential store.

use super::{CredentialRecord, CredentialStore, RecordId, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::instrument;

const RECORD_COLUMNS: &str = "id, subject, bound_address, refresh_fingerprint, \
                              rotation_count, created_at, rotated_at";

/// Reduce a sqlx error to a category that carries no query text or addresses.
fn sanitize(operation: &'static str, err: &sqlx::Error) -> StoreError {
    let reason = match err {
        sqlx::Error::Database(db) => db
            .code()
            .map_or_else(|| "database error".to_string(), |code| format!("database error {code}")),
        sqlx::Error::PoolTimedOut => "pool timed out".to_string(),
        sqlx::Error::PoolClosed => "pool closed".to_string(),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => "connection failure".to_string(),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => "row decode failure".to_string(),
        sqlx::Error::Configuration(_) => "invalid configuration".to_string(),
        _ => "backend error".to_string(),
    };
    StoreError::backend(operation, reason)
}

fn map_row(operation: &'static str, row: &PgRow) -> Result<CredentialRecord, StoreError> {
    let rotation_count: i32 = row
        .try_get("rotation_count")
        .map_err(|e| sanitize(operation, &e))?;

    Ok(CredentialRecord {
        record_id: row.try_get("id").map_err(|e| sanitize(operation, &e))?,
        subject: row.try_get("subject").map_err(|e| sanitize(operation, &e))?,
        bound_address: row
            .try_get("bound_address")
            .map_err(|e| sanitize(operation, &e))?,
        refresh_fingerprint: row
            .try_get("refresh_fingerprint")
            .map_err(|e| sanitize(operation, &e))?,
        rotation_count: u32::try_from(rotation_count)
            .map_err(|_| StoreError::backend(operation, "negative rotation_count"))?,
        created_at: row.try_get("created_at").map_err(|e| sanitize(operation, &e))?,
        rotated_at: row.try_get("rotated_at").map_err(|e| sanitize(operation, &e))?,
    })
}

/// Credential store on Postgres.
///
/// One row per subject (`subject` is unique). Creating a record for a
/// subject that already has one replaces the row with a fresh id.
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    /// Table definition the store expects.
    pub const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS credential_records (
            id UUID PRIMARY KEY,
            subject TEXT NOT NULL UNIQUE,
            bound_address TEXT NOT NULL,
            refresh_fingerprint TEXT NULL,
            rotation_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            rotated_at TIMESTAMPTZ NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_credential_records_fingerprint
            ON credential_records (refresh_fingerprint)
            WHERE refresh_fingerprint IS NOT NULL;
    ";

    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| sanitize("connect", &e))?;

        Ok(Self::new(pool))
    }

    /// Create the table and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(Self::SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| sanitize("ensure_schema", &e))?;
        Ok(())
    }

    async fn exists(&self, operation: &'static str, record_id: RecordId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM credential_records WHERE id = $1")
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| sanitize(operation, &e))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self, subject, bound_address))]
    async fn create(
        &self,
        subject: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordId, StoreError> {
        let record = CredentialRecord::new(subject, bound_address, now);

        let row = sqlx::query(
            r"
            INSERT INTO credential_records (
                id, subject, bound_address, refresh_fingerprint,
                rotation_count, created_at, rotated_at
            )
            VALUES ($1, $2, $3, NULL, 0, $4, NULL)
            ON CONFLICT (subject) DO UPDATE
            SET id = EXCLUDED.id,
                bound_address = EXCLUDED.bound_address,
                refresh_fingerprint = NULL,
                rotation_count = 0,
                created_at = EXCLUDED.created_at,
                rotated_at = NULL
            RETURNING id
            ",
        )
        .bind(record.record_id)
        .bind(&record.subject)
        .bind(&record.bound_address)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| sanitize("create", &e))?;

        row.try_get("id").map_err(|e| sanitize("create", &e))
    }

    #[instrument(skip(self, fingerprint))]
    async fn set_fingerprint(
        &self,
        record_id: RecordId,
        fingerprint: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE credential_records SET refresh_fingerprint = $1 WHERE id = $2",
        )
        .bind(fingerprint)
        .bind(record_id)
        .execute(&self.pool)
        .await
        .map_err(|e| sanitize("set_fingerprint", &e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, expected, next, bound_address))]
    async fn replace_fingerprint(
        &self,
        record_id: RecordId,
        expected: &str,
        next: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE credential_records
            SET refresh_fingerprint = $1,
                bound_address = $2,
                rotation_count = rotation_count + 1,
                rotated_at = $3
            WHERE id = $4 AND refresh_fingerprint = $5
            ",
        )
        .bind(next)
        .bind(bound_address)
        .bind(now)
        .bind(record_id)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(|e| sanitize("replace_fingerprint", &e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        if self.exists("replace_fingerprint", record_id).await? {
            Err(StoreError::FingerprintConflict)
        } else {
            Err(StoreError::RecordNotFound)
        }
    }

    #[instrument(skip(self, fingerprint))]
    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<CredentialRecord, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM credential_records WHERE refresh_fingerprint = $1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| sanitize("get_by_fingerprint", &e))?
        .ok_or(StoreError::RecordNotFound)?;

        map_row("get_by_fingerprint", &row)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, record_id: RecordId) -> Result<CredentialRecord, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM credential_records WHERE id = $1"
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| sanitize("get_by_id", &e))?
        .ok_or(StoreError::RecordNotFound)?;

        map_row("get_by_id", &row)
    }
}
