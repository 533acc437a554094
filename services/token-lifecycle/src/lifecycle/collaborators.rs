//! External collaborators consumed by the engine.

use crate::error::EngineError;
use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Failure reported by a notification sink.
#[derive(Error, Debug)]
#[error("address change notification failed: {0}")]
pub struct NotificationError(pub String);

/// Identity lookup answering whether a subject exists.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    /// Resolve a raw identifier (for example a login name) to a subject.
    ///
    /// # Errors
    ///
    /// Returns `SubjectNotFound` if the identifier is unknown.
    async fn resolve_subject(&self, raw_identifier: &str) -> Result<String, EngineError>;
}

/// Sink alerting a subject that their session moved to a new address.
#[async_trait]
pub trait AddressChangeNotifier: Send + Sync {
    /// Deliver the alert. The engine ignores failures.
    async fn notify_address_change(
        &self,
        subject: &str,
        previous_address: &str,
        current_address: &str,
    ) -> Result<(), NotificationError>;
}

/// Resolver that treats every non-blank identifier as its own subject.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughResolver;

#[async_trait]
impl SubjectResolver for PassthroughResolver {
    async fn resolve_subject(&self, raw_identifier: &str) -> Result<String, EngineError> {
        let subject = raw_identifier.trim();
        if subject.is_empty() {
            return Err(EngineError::SubjectNotFound);
        }
        Ok(subject.to_string())
    }
}

/// Notifier that emits a security warning through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl AddressChangeNotifier for TracingNotifier {
    async fn notify_address_change(
        &self,
        subject: &str,
        previous_address: &str,
        current_address: &str,
    ) -> Result<(), NotificationError> {
        warn!(
            subject = %subject,
            previous_address = %previous_address,
            current_address = %current_address,
            "Refresh token presented from a new address"
        );
        Ok(())
    }
}
