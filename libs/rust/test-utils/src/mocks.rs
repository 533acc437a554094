//! Mock collaborators for engine tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use token_lifecycle::lifecycle::{AddressChangeNotifier, NotificationError, SubjectResolver};
use token_lifecycle::storage::{CredentialRecord, CredentialStore, RecordId, StoreError};
use token_lifecycle::EngineError;

/// A recorded address-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressChangeCall {
    /// Subject notified
    pub subject: String,
    /// Address before the rotation
    pub previous_address: String,
    /// Address presenting the rotation
    pub current_address: String,
}

/// Notifier that records every call and optionally fails.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Arc<RwLock<Vec<AddressChangeCall>>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    /// Create a notifier that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier whose every delivery fails.
    #[must_use]
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    /// All calls received so far.
    pub async fn calls(&self) -> Vec<AddressChangeCall> {
        self.calls.read().await.clone()
    }

    /// Number of calls received.
    pub async fn count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl AddressChangeNotifier for RecordingNotifier {
    async fn notify_address_change(
        &self,
        subject: &str,
        previous_address: &str,
        current_address: &str,
    ) -> Result<(), NotificationError> {
        self.calls.write().await.push(AddressChangeCall {
            subject: subject.to_string(),
            previous_address: previous_address.to_string(),
            current_address: current_address.to_string(),
        });

        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError("mail relay unavailable".to_string()));
        }
        Ok(())
    }
}

/// Resolver backed by a fixed set of known subjects.
#[derive(Debug, Default)]
pub struct StaticSubjectResolver {
    known: HashSet<String>,
}

impl StaticSubjectResolver {
    /// Create a resolver knowing the given subjects.
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: subjects.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SubjectResolver for StaticSubjectResolver {
    async fn resolve_subject(&self, raw_identifier: &str) -> Result<String, EngineError> {
        if self.known.contains(raw_identifier) {
            Ok(raw_identifier.to_string())
        } else {
            Err(EngineError::SubjectNotFound)
        }
    }
}

/// Store whose every operation fails with a backend error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

#[async_trait]
impl CredentialStore for FailingStore {
    async fn create(
        &self,
        _subject: &str,
        _bound_address: &str,
        _now: DateTime<Utc>,
    ) -> Result<RecordId, StoreError> {
        Err(StoreError::backend("create", "connection refused"))
    }

    async fn set_fingerprint(
        &self,
        _record_id: RecordId,
        _fingerprint: &str,
    ) -> Result<(), StoreError> {
        Err(StoreError::backend("set_fingerprint", "connection refused"))
    }

    async fn replace_fingerprint(
        &self,
        _record_id: RecordId,
        _expected: &str,
        _next: &str,
        _bound_address: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(StoreError::backend("replace_fingerprint", "connection refused"))
    }

    async fn get_by_fingerprint(&self, _fingerprint: &str) -> Result<CredentialRecord, StoreError> {
        Err(StoreError::backend("get_by_fingerprint", "connection refused"))
    }

    async fn get_by_id(&self, _record_id: RecordId) -> Result<CredentialRecord, StoreError> {
        Err(StoreError::backend("get_by_id", "connection refused"))
    }
}

/// Store wrapper that delays every call before delegating.
pub struct SlowStore<S> {
    inner: S,
    delay: Duration,
}

impl<S> SlowStore<S> {
    /// Wrap `inner`, delaying each call by `delay`.
    pub const fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<S: CredentialStore> CredentialStore for SlowStore<S> {
    async fn create(
        &self,
        subject: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordId, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.create(subject, bound_address, now).await
    }

    async fn set_fingerprint(
        &self,
        record_id: RecordId,
        fingerprint: &str,
    ) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_fingerprint(record_id, fingerprint).await
    }

    async fn replace_fingerprint(
        &self,
        record_id: RecordId,
        expected: &str,
        next: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .replace_fingerprint(record_id, expected, next, bound_address, now)
            .await
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<CredentialRecord, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_by_fingerprint(fingerprint).await
    }

    async fn get_by_id(&self, record_id: RecordId) -> Result<CredentialRecord, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_by_id(record_id).await
    }
}

/// Store wrapper whose `set_fingerprint` always fails with a backend error.
///
/// Records are still created in the inner store, so issuance leaves a
/// provisioned record behind. The ids of those records are kept.
pub struct FingerprintWriteFailingStore<S> {
    inner: S,
    attempted: RwLock<Vec<RecordId>>,
}

impl<S> FingerprintWriteFailingStore<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            attempted: RwLock::new(Vec::new()),
        }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Records whose fingerprint write was refused.
    pub async fn attempted_records(&self) -> Vec<RecordId> {
        self.attempted.read().await.clone()
    }
}

#[async_trait]
impl<S: CredentialStore> CredentialStore for FingerprintWriteFailingStore<S> {
    async fn create(
        &self,
        subject: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordId, StoreError> {
        self.inner.create(subject, bound_address, now).await
    }

    async fn set_fingerprint(
        &self,
        record_id: RecordId,
        _fingerprint: &str,
    ) -> Result<(), StoreError> {
        self.attempted.write().await.push(record_id);
        Err(StoreError::backend("set_fingerprint", "write timed out"))
    }

    async fn replace_fingerprint(
        &self,
        record_id: RecordId,
        expected: &str,
        next: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner
            .replace_fingerprint(record_id, expected, next, bound_address, now)
            .await
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<CredentialRecord, StoreError> {
        self.inner.get_by_fingerprint(fingerprint).await
    }

    async fn get_by_id(&self, record_id: RecordId) -> Result<CredentialRecord, StoreError> {
        self.inner.get_by_id(record_id).await
    }
}
