//! Engine fixtures with deterministic time and cheap hashing.

use std::sync::Arc;
use std::time::Duration;
use token_lifecycle::clock::ManualClock;
use token_lifecycle::config::AddressPolicy;
use token_lifecycle::fingerprint::{FingerprintHasher, HashCost};
use token_lifecycle::jwt::TokenCodec;
use token_lifecycle::lifecycle::{AddressChangeNotifier, EngineSettings, SubjectResolver};
use token_lifecycle::storage::{CredentialStore, MemoryCredentialStore};
use token_lifecycle::LifecycleEngine;
use zeroize::Zeroizing;

/// Issuer used by fixture codecs.
pub const TEST_ISSUER: &str = "token-lifecycle-test";

/// Signing secret used by fixture codecs.
pub const TEST_SIGNING_SECRET: &[u8] = b"fixture-signing-secret-0123456789";

/// Pepper used by fixture hashers.
pub const TEST_PEPPER: &[u8] = b"fixture-fingerprint-pepper";

/// Smallest Argon2id cost, keeping tests fast.
#[must_use]
pub const fn cheap_hash_cost() -> HashCost {
    HashCost {
        memory_kib: 256,
        iterations: 1,
        parallelism: 1,
    }
}

/// Settings with short lifetimes for tests.
#[must_use]
pub const fn test_settings() -> EngineSettings {
    EngineSettings {
        access_token_ttl: Duration::from_secs(300),
        refresh_token_ttl: Duration::from_secs(3_600),
        address_policy: AddressPolicy::Notify,
        operation_timeout: Duration::from_secs(5),
    }
}

/// Hasher with the fixture pepper and cheap cost.
///
/// # Panics
///
/// Panics if the cheap cost is rejected, which would be a fixture bug.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_hasher() -> FingerprintHasher {
    FingerprintHasher::new(TEST_PEPPER, cheap_hash_cost()).expect("cheap cost is valid")
}

/// A codec sharing `clock`.
#[must_use]
pub fn test_codec(clock: Arc<ManualClock>) -> TokenCodec {
    TokenCodec::new(TEST_ISSUER, TEST_SIGNING_SECRET, clock)
}

/// An engine together with handles to its clock and store.
pub struct TestEngine<S = MemoryCredentialStore> {
    /// Engine under test
    pub engine: LifecycleEngine,
    /// Clock driving minting and expiry
    pub clock: Arc<ManualClock>,
    /// Store backing the engine
    pub store: Arc<S>,
}

/// Builder for [`TestEngine`].
pub struct TestEngineBuilder<S> {
    store: Arc<S>,
    settings: EngineSettings,
    notifier: Option<Arc<dyn AddressChangeNotifier>>,
    resolver: Option<Arc<dyn SubjectResolver>>,
    pepper: Zeroizing<Vec<u8>>,
}

impl TestEngineBuilder<MemoryCredentialStore> {
    /// Start from an in-memory store and [`test_settings`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryCredentialStore::new()))
    }
}

impl Default for TestEngineBuilder<MemoryCredentialStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CredentialStore + 'static> TestEngineBuilder<S> {
    /// Start from a caller-supplied store.
    #[must_use]
    pub fn with_store(store: Arc<S>) -> Self {
        Self {
            store,
            settings: test_settings(),
            notifier: None,
            resolver: None,
            pepper: Zeroizing::new(TEST_PEPPER.to_vec()),
        }
    }

    /// Override settings.
    #[must_use]
    pub const fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the address policy.
    #[must_use]
    pub const fn address_policy(mut self, policy: AddressPolicy) -> Self {
        self.settings.address_policy = policy;
        self
    }

    /// Set the operation timeout.
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.settings.operation_timeout = timeout;
        self
    }

    /// Install a notifier.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn AddressChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Install a resolver.
    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn SubjectResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use a different pepper.
    #[must_use]
    pub fn pepper(mut self, pepper: &[u8]) -> Self {
        self.pepper = Zeroizing::new(pepper.to_vec());
        self
    }

    /// Assemble the engine.
    ///
    /// # Panics
    ///
    /// Panics if the cheap hash cost is rejected.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn build(self) -> TestEngine<S> {
        let store: Arc<dyn CredentialStore> = self.store.clone();
        let clock = Arc::new(ManualClock::starting_now());
        let hasher =
            FingerprintHasher::new(&self.pepper, cheap_hash_cost()).expect("cheap cost is valid");
        let mut engine = LifecycleEngine::new(
            test_codec(clock.clone()),
            hasher,
            store,
            self.settings,
        );
        if let Some(notifier) = self.notifier {
            engine = engine.with_notifier(notifier);
        }
        if let Some(resolver) = self.resolver {
            engine = engine.with_resolver(resolver);
        }

        TestEngine {
            engine,
            clock,
            store: self.store,
        }
    }
}

/// Engine over an in-memory store with default test settings.
#[must_use]
pub fn test_engine() -> TestEngine {
    TestEngineBuilder::new().build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hasher_round_trip() {
        let hasher = test_hasher();
        let fingerprint = hasher.hash("token").unwrap();
        assert!(hasher.verify("token", &fingerprint));
    }

    #[tokio::test]
    async fn test_engine_issues() {
        let fixture = test_engine();
        fixture.engine.issue("user-1", "1.2.3.4").await.unwrap();
        assert_eq!(fixture.store.len().await, 1);
    }
}
