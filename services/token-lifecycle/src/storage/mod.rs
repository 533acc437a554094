//! Credential store: durable records keyed by id and by refresh fingerprint.

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::MemoryCredentialStore;
pub use postgres::PostgresCredentialStore;
pub use self::redis::RedisCredentialStore;

use crate::config::StoreBackend;
use crate::error::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a credential record, embedded in refresh tokens.
pub type RecordId = Uuid;

/// Lifecycle state derived from a record's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Created, no fingerprint yet
    Provisioned,
    /// Holds the fingerprint of the live refresh token
    Active,
}

/// Stored credential for one subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Stable identifier across rotations
    pub record_id: RecordId,
    /// Owning subject
    pub subject: String,
    /// Address captured at issuance or the latest rotation
    pub bound_address: String,
    /// Fingerprint of the live refresh token
    pub refresh_fingerprint: Option<String>,
    /// Number of successful rotations
    pub rotation_count: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the latest rotation
    pub rotated_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Create a provisioned record with a fresh id.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        bound_address: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            subject: subject.into(),
            bound_address: bound_address.into(),
            refresh_fingerprint: None,
            rotation_count: 0,
            created_at,
            rotated_at: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RecordState {
        if self.refresh_fingerprint.is_some() {
            RecordState::Active
        } else {
            RecordState::Provisioned
        }
    }

    /// Whether the record currently holds exactly this fingerprint.
    #[must_use]
    pub fn holds_fingerprint(&self, fingerprint: &str) -> bool {
        self.refresh_fingerprint.as_deref() == Some(fingerprint)
    }

    /// Replace the fingerprint as a rotation performed at `rotated_at`.
    pub fn rotate(
        &mut self,
        next: impl Into<String>,
        bound_address: impl Into<String>,
        rotated_at: DateTime<Utc>,
    ) {
        self.refresh_fingerprint = Some(next.into());
        self.bound_address = bound_address.into();
        self.rotation_count = self.rotation_count.saturating_add(1);
        self.rotated_at = Some(rotated_at);
    }
}

/// Errors reported by credential store adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No record matches the lookup
    #[error("credential record not found")]
    RecordNotFound,

    /// Compare-and-swap lost: the record no longer holds the expected fingerprint
    #[error("fingerprint no longer current")]
    FingerprintConflict,

    /// Backend fault
    #[error("{operation} failed: {reason}")]
    Backend {
        /// Store operation that failed
        operation: &'static str,
        /// Sanitized failure category
        reason: String,
    },
}

impl StoreError {
    /// Create a backend error.
    #[must_use]
    pub fn backend(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RecordNotFound => Self::RecordNotFound,
            StoreError::FingerprintConflict => Self::RefreshReplayOrForged,
            StoreError::Backend { operation, reason } => Self::StorageFailure { operation, reason },
        }
    }
}

/// Durable storage for credential records.
///
/// Implementations must serialize writes per record: `replace_fingerprint`
/// is a single atomic compare-and-swap, so two rotations presenting the same
/// fingerprint can never both succeed.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Allocate a fresh provisioned record created at `now`, replacing any
    /// record the subject already owns.
    async fn create(
        &self,
        subject: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordId, StoreError>;

    /// Overwrite the fingerprint unconditionally.
    async fn set_fingerprint(&self, record_id: RecordId, fingerprint: &str)
        -> Result<(), StoreError>;

    /// Swap `expected` for `next`, rebind the address and stamp the rotation
    /// with `now`, only if the record still holds `expected`.
    async fn replace_fingerprint(
        &self,
        record_id: RecordId,
        expected: &str,
        next: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Find the record holding exactly this fingerprint.
    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<CredentialRecord, StoreError>;

    /// Find a record by id.
    async fn get_by_id(&self, record_id: RecordId) -> Result<CredentialRecord, StoreError>;
}

/// Build the store selected by configuration.
///
/// # Errors
///
/// Returns `StorageFailure` if the backend cannot be reached.
pub async fn connect(backend: &StoreBackend) -> Result<Arc<dyn CredentialStore>, EngineError> {
    let store: Arc<dyn CredentialStore> = match backend {
        StoreBackend::Memory => Arc::new(MemoryCredentialStore::new()),
        StoreBackend::Redis { url } => Arc::new(RedisCredentialStore::new(url).await?),
        StoreBackend::Postgres {
            url,
            max_connections,
        } => {
            let store = PostgresCredentialStore::connect(url, *max_connections).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_provisioned() {
        let created_at = Utc::now();
        let record = CredentialRecord::new("user-1", "10.0.0.1", created_at);

        assert_eq!(record.state(), RecordState::Provisioned);
        assert_eq!(record.created_at, created_at);
        assert_eq!(record.rotation_count, 0);
        assert!(!record.holds_fingerprint("anything"));
    }

    #[test]
    fn test_rotation_replaces_fingerprint() {
        let created_at = Utc::now();
        let mut record = CredentialRecord::new("user-1", "10.0.0.1", created_at);
        record.refresh_fingerprint = Some("fp-1".to_string());
        let id = record.record_id;
        let rotated_at = created_at + chrono::Duration::seconds(90);

        record.rotate("fp-2", "10.0.0.2", rotated_at);

        assert_eq!(record.state(), RecordState::Active);
        assert_eq!(record.record_id, id);
        assert_eq!(record.rotation_count, 1);
        assert_eq!(record.bound_address, "10.0.0.2");
        assert_eq!(record.rotated_at, Some(rotated_at));
        assert_eq!(record.created_at, created_at);
        assert!(!record.holds_fingerprint("fp-1"));
        assert!(record.holds_fingerprint("fp-2"));
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            EngineError::from(StoreError::FingerprintConflict),
            EngineError::RefreshReplayOrForged
        ));
        assert!(matches!(
            EngineError::from(StoreError::RecordNotFound),
            EngineError::RecordNotFound
        ));
        assert!(matches!(
            EngineError::from(StoreError::backend("create", "pool timed out")),
            EngineError::StorageFailure {
                operation: "create",
                ..
            }
        ));
    }
}
