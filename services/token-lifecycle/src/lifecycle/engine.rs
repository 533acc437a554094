//! Orchestration of issuance and rotation over the codec, hasher and store.

use super::collaborators::{
    AddressChangeNotifier, PassthroughResolver, SubjectResolver, TracingNotifier,
};
use super::pair::TokenPair;
use crate::clock::Clock;
use crate::config::{AddressPolicy, Config};
use crate::error::EngineError;
use crate::fingerprint::FingerprintHasher;
use crate::jwt::{TokenCodec, TokenKind};
use crate::metrics;
use crate::storage::{CredentialStore, RecordId, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

/// Tunables of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// Address-change handling
    pub address_policy: AddressPolicy,
    /// Deadline for each operation
    pub operation_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(604_800),
            address_policy: AddressPolicy::Notify,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            access_token_ttl: config.access_token_ttl,
            refresh_token_ttl: config.refresh_token_ttl,
            address_policy: config.address_policy,
            operation_timeout: config.operation_timeout,
        }
    }
}

/// Address change detected by a successful rotation.
struct AddressChange {
    subject: String,
    previous: String,
    current: String,
}

/// Issues token pairs and rotates single-use refresh tokens.
///
/// Refresh consumes the presented token with one compare-and-swap on the
/// credential record. Both replacement tokens are minted and hashed before
/// that commit, so a failure anywhere before it leaves the presented token
/// valid.
pub struct LifecycleEngine {
    codec: Arc<TokenCodec>,
    hasher: Arc<FingerprintHasher>,
    store: Arc<dyn CredentialStore>,
    resolver: Arc<dyn SubjectResolver>,
    notifier: Arc<dyn AddressChangeNotifier>,
    settings: EngineSettings,
}

impl LifecycleEngine {
    /// Create an engine with the pass-through resolver and tracing notifier.
    pub fn new(
        codec: TokenCodec,
        hasher: FingerprintHasher,
        store: Arc<dyn CredentialStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            codec: Arc::new(codec),
            hasher: Arc::new(hasher),
            store,
            resolver: Arc::new(PassthroughResolver),
            notifier: Arc::new(TracingNotifier),
            settings,
        }
    }

    /// Build an engine from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `HashingFailure` if the configured cost is invalid.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let codec = TokenCodec::new(config.jwt_issuer.clone(), &config.signing_secret, clock);
        let hasher = FingerprintHasher::new(&config.fingerprint.pepper, config.fingerprint.cost)?;
        Ok(Self::new(codec, hasher, store, EngineSettings::from(config)))
    }

    /// Replace the subject resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn SubjectResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the address-change notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn AddressChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Codec used for minting and decoding.
    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Issue a fresh token pair for `subject` bound to `bound_address`.
    ///
    /// Replaces any credential record the subject already owns.
    ///
    /// # Errors
    ///
    /// Returns infrastructure errors (`SigningFailure`, `HashingFailure`,
    /// `StorageFailure`, `Timeout`). A failure after record creation leaves
    /// a provisioned record that no refresh can ever match. A concurrent
    /// issuance for the same subject that replaces the record first surfaces
    /// as a retryable `StorageFailure`.
    #[instrument(skip(self, bound_address))]
    pub async fn issue(&self, subject: &str, bound_address: &str) -> Result<TokenPair, EngineError> {
        self.bounded(self.issue_unbounded(subject, bound_address))
            .await
    }

    /// Resolve `raw_identifier` to a subject, then issue a pair for it.
    ///
    /// # Errors
    ///
    /// Returns `SubjectNotFound` if the resolver does not know the
    /// identifier, otherwise as [`LifecycleEngine::issue`].
    #[instrument(skip_all)]
    pub async fn authenticate(
        &self,
        raw_identifier: &str,
        bound_address: &str,
    ) -> Result<TokenPair, EngineError> {
        self.bounded(async {
            let subject = self.resolver.resolve_subject(raw_identifier).await?;
            self.issue_unbounded(&subject, bound_address).await
        })
        .await
    }

    /// Rotate a refresh token presented from `client_address`.
    ///
    /// # Errors
    ///
    /// - `TokenMalformed`, `TokenExpired`, `TokenKindMismatch` from decoding
    /// - `RefreshReplayOrForged` if the token is not the record's live token,
    ///   including when a concurrent refresh consumed it first
    /// - `AddressMismatch` if the address changed and the policy rejects it;
    ///   the token stays usable
    /// - infrastructure errors, none of which consume the token
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_address: &str,
    ) -> Result<TokenPair, EngineError> {
        let result = self
            .bounded(self.refresh_unbounded(refresh_token, client_address))
            .await;

        match result {
            Ok((pair, change)) => {
                metrics::record_refresh("success");
                if let Some(change) = change {
                    self.notify(change).await;
                }
                Ok(pair)
            }
            Err(err) => {
                metrics::record_refresh(if err.is_retryable() { "error" } else { "rejected" });
                Err(err)
            }
        }
    }

    async fn issue_unbounded(
        &self,
        subject: &str,
        bound_address: &str,
    ) -> Result<TokenPair, EngineError> {
        let now = self.codec.clock().now();
        let record_id = self.store.create(subject, bound_address, now).await?;

        let refresh_token = self.codec.mint(
            TokenKind::Refresh,
            subject,
            bound_address,
            record_id,
            self.settings.refresh_token_ttl,
        )?;
        let fingerprint = self.hash(&refresh_token).await?;
        self.store
            .set_fingerprint(record_id, &fingerprint)
            .await
            .map_err(|err| match err {
                StoreError::RecordNotFound => {
                    debug!(record_id = %record_id, "Record replaced by a concurrent issuance");
                    EngineError::StorageFailure {
                        operation: "set_fingerprint",
                        reason: "superseded by concurrent issuance".to_string(),
                    }
                }
                other => other.into(),
            })?;

        let access_token = self.codec.mint(
            TokenKind::Access,
            subject,
            bound_address,
            record_id,
            self.settings.access_token_ttl,
        )?;

        metrics::record_token_issued(TokenKind::Refresh.as_str());
        metrics::record_token_issued(TokenKind::Access.as_str());
        info!(record_id = %record_id, subject = %subject, "Issued token pair");

        Ok(TokenPair::new(
            access_token,
            refresh_token,
            self.settings.access_token_ttl,
        ))
    }

    async fn refresh_unbounded(
        &self,
        refresh_token: &str,
        client_address: &str,
    ) -> Result<(TokenPair, Option<AddressChange>), EngineError> {
        let claims = self.codec.decode(refresh_token, TokenKind::Refresh)?;

        let record = match self.store.get_by_id(claims.rid).await {
            Ok(record) => record,
            Err(StoreError::RecordNotFound) => return Err(Self::replay(claims.rid)),
            Err(err) => return Err(err.into()),
        };
        let Some(current) = record.refresh_fingerprint.clone() else {
            return Err(Self::replay(record.record_id));
        };
        if !self.verify(refresh_token, current.clone()).await? {
            return Err(Self::replay(record.record_id));
        }

        let change = if record.bound_address == client_address {
            None
        } else {
            match self.settings.address_policy {
                AddressPolicy::Reject => {
                    metrics::record_security_event("ADDRESS_REJECTED");
                    warn!(record_id = %record.record_id, "Refresh rejected from a new address");
                    return Err(EngineError::AddressMismatch {
                        expected: record.bound_address,
                        actual: client_address.to_string(),
                    });
                }
                AddressPolicy::Notify => Some(AddressChange {
                    subject: record.subject.clone(),
                    previous: record.bound_address.clone(),
                    current: client_address.to_string(),
                }),
            }
        };

        let next_refresh = self.codec.mint(
            TokenKind::Refresh,
            &record.subject,
            client_address,
            record.record_id,
            self.settings.refresh_token_ttl,
        )?;
        let next_fingerprint = self.hash(&next_refresh).await?;
        let access_token = self.codec.mint(
            TokenKind::Access,
            &record.subject,
            client_address,
            record.record_id,
            self.settings.access_token_ttl,
        )?;

        let now = self.codec.clock().now();
        self.store
            .replace_fingerprint(
                record.record_id,
                &current,
                &next_fingerprint,
                client_address,
                now,
            )
            .await
            .map_err(|err| match err {
                StoreError::FingerprintConflict | StoreError::RecordNotFound => {
                    Self::replay(record.record_id)
                }
                StoreError::Backend { .. } => err.into(),
            })?;

        if change.is_some() {
            metrics::record_security_event("ADDRESS_CHANGED");
        }
        metrics::record_token_issued(TokenKind::Refresh.as_str());
        metrics::record_token_issued(TokenKind::Access.as_str());
        info!(
            record_id = %record.record_id,
            rotation_count = record.rotation_count.saturating_add(1),
            "Rotated refresh token"
        );

        Ok((
            TokenPair::new(access_token, next_refresh, self.settings.access_token_ttl),
            change,
        ))
    }

    /// Deliver an address-change alert. Failures and timeouts are logged only.
    async fn notify(&self, change: AddressChange) {
        let delivery = self.notifier.notify_address_change(
            &change.subject,
            &change.previous,
            &change.current,
        );
        match tokio::time::timeout(self.settings.operation_timeout, delivery).await {
            Ok(Ok(())) => debug!(subject = %change.subject, "Address change notified"),
            Ok(Err(err)) => warn!(subject = %change.subject, error = %err, "Address change notification failed"),
            Err(_) => warn!(subject = %change.subject, "Address change notification timed out"),
        }
    }

    fn replay(record_id: RecordId) -> EngineError {
        metrics::record_security_event("REFRESH_REPLAY_OR_FORGED");
        warn!(record_id = %record_id, "Refresh token replayed or forged");
        EngineError::RefreshReplayOrForged
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let limit = self.settings.operation_timeout;
        tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| EngineError::Timeout(limit))?
    }

    async fn hash(&self, token: &str) -> Result<String, EngineError> {
        let hasher = Arc::clone(&self.hasher);
        let token = Zeroizing::new(token.to_owned());
        tokio::task::spawn_blocking(move || hasher.hash(&token))
            .await
            .map_err(|e| EngineError::hashing(format!("hash task failed: {e}")))?
    }

    async fn verify(&self, token: &str, fingerprint: String) -> Result<bool, EngineError> {
        let hasher = Arc::clone(&self.hasher);
        let token = Zeroizing::new(token.to_owned());
        tokio::task::spawn_blocking(move || hasher.verify(&token, &fingerprint))
            .await
            .map_err(|e| EngineError::hashing(format!("verify task failed: {e}")))
    }
}
