//! In-process credential store.

use super::{CredentialRecord, CredentialStore, RecordId, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Tables {
    records: HashMap<RecordId, CredentialRecord>,
    by_subject: HashMap<String, RecordId>,
    by_fingerprint: HashMap<String, RecordId>,
}

impl Tables {
    fn remove(&mut self, record_id: RecordId) {
        if let Some(record) = self.records.remove(&record_id) {
            if let Some(fingerprint) = record.refresh_fingerprint {
                self.by_fingerprint.remove(&fingerprint);
            }
        }
    }
}

/// Credential store backed by an in-memory table.
///
/// All mutations take the write lock, which makes each of them a single
/// atomic step.
#[derive(Default)]
pub struct MemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.tables.read().await.records.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.records.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create(
        &self,
        subject: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordId, StoreError> {
        let record = CredentialRecord::new(subject, bound_address, now);
        let record_id = record.record_id;

        let mut tables = self.tables.write().await;
        if let Some(previous) = tables.by_subject.insert(subject.to_string(), record_id) {
            debug!(record_id = %previous, "Replacing previous credential record");
            tables.remove(previous);
        }
        tables.records.insert(record_id, record);

        Ok(record_id)
    }

    async fn set_fingerprint(
        &self,
        record_id: RecordId,
        fingerprint: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .records
            .get_mut(&record_id)
            .ok_or(StoreError::RecordNotFound)?;

        let previous = record.refresh_fingerprint.replace(fingerprint.to_string());
        if let Some(previous) = previous {
            tables.by_fingerprint.remove(&previous);
        }
        tables
            .by_fingerprint
            .insert(fingerprint.to_string(), record_id);

        Ok(())
    }

    async fn replace_fingerprint(
        &self,
        record_id: RecordId,
        expected: &str,
        next: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .records
            .get_mut(&record_id)
            .ok_or(StoreError::RecordNotFound)?;

        if !record.holds_fingerprint(expected) {
            return Err(StoreError::FingerprintConflict);
        }
        record.rotate(next, bound_address, now);

        tables.by_fingerprint.remove(expected);
        tables.by_fingerprint.insert(next.to_string(), record_id);

        Ok(())
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<CredentialRecord, StoreError> {
        let tables = self.tables.read().await;
        tables
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| tables.records.get(id))
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }

    async fn get_by_id(&self, record_id: RecordId) -> Result<CredentialRecord, StoreError> {
        self.tables
            .read()
            .await
            .records
            .get(&record_id)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordState;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryCredentialStore::new();
        let id = store.create("user-1", "10.0.0.1", Utc::now()).await.unwrap();

        let record = store.get_by_id(id).await.unwrap();
        assert_eq!(record.subject, "user-1");
        assert_eq!(record.bound_address, "10.0.0.1");
        assert_eq!(record.state(), RecordState::Provisioned);
    }

    #[tokio::test]
    async fn test_unknown_record() {
        let store = MemoryCredentialStore::new();
        let id = uuid::Uuid::new_v4();

        assert!(matches!(store.get_by_id(id).await, Err(StoreError::RecordNotFound)));
        assert!(matches!(
            store.set_fingerprint(id, "fp").await,
            Err(StoreError::RecordNotFound)
        ));
        assert!(matches!(
            store.replace_fingerprint(id, "fp", "fp2", "a", Utc::now()).await,
            Err(StoreError::RecordNotFound)
        ));
    }

    #[tokio::test]
    async fn test_provisioned_record_never_matches_fingerprint_lookup() {
        let store = MemoryCredentialStore::new();
        store.create("user-1", "10.0.0.1", Utc::now()).await.unwrap();

        assert!(matches!(
            store.get_by_fingerprint("").await,
            Err(StoreError::RecordNotFound)
        ));
    }

    #[tokio::test]
    async fn test_set_fingerprint_overwrites() {
        let store = MemoryCredentialStore::new();
        let id = store.create("user-1", "10.0.0.1", Utc::now()).await.unwrap();

        store.set_fingerprint(id, "fp-1").await.unwrap();
        store.set_fingerprint(id, "fp-2").await.unwrap();

        assert!(matches!(
            store.get_by_fingerprint("fp-1").await,
            Err(StoreError::RecordNotFound)
        ));
        assert_eq!(store.get_by_fingerprint("fp-2").await.unwrap().record_id, id);
    }

    #[tokio::test]
    async fn test_replace_requires_current_fingerprint() {
        let store = MemoryCredentialStore::new();
        let id = store.create("user-1", "10.0.0.1", Utc::now()).await.unwrap();
        store.set_fingerprint(id, "fp-1").await.unwrap();

        store
            .replace_fingerprint(id, "fp-1", "fp-2", "10.0.0.9", Utc::now())
            .await
            .unwrap();
        let stale = store
            .replace_fingerprint(id, "fp-1", "fp-3", "10.0.0.9", Utc::now())
            .await;

        assert!(matches!(stale, Err(StoreError::FingerprintConflict)));
        let record = store.get_by_id(id).await.unwrap();
        assert!(record.holds_fingerprint("fp-2"));
        assert_eq!(record.bound_address, "10.0.0.9");
        assert_eq!(record.rotation_count, 1);
    }

    #[tokio::test]
    async fn test_create_replaces_subject_record() {
        let store = MemoryCredentialStore::new();
        let first = store.create("user-1", "10.0.0.1", Utc::now()).await.unwrap();
        store.set_fingerprint(first, "fp-1").await.unwrap();

        let second = store.create("user-1", "10.0.0.2", Utc::now()).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.len().await, 1);
        assert!(matches!(store.get_by_id(first).await, Err(StoreError::RecordNotFound)));
        assert!(matches!(
            store.get_by_fingerprint("fp-1").await,
            Err(StoreError::RecordNotFound)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_replace_single_winner() {
        let store = Arc::new(MemoryCredentialStore::new());
        let id = store.create("user-1", "10.0.0.1", Utc::now()).await.unwrap();
        store.set_fingerprint(id, "fp-0").await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .replace_fingerprint(
                            id,
                            "fp-0",
                            &format!("fp-{}", i + 1),
                            "10.0.0.1",
                            Utc::now(),
                        )
                        .await
                })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
