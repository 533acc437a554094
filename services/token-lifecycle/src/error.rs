//! Error taxonomy for the token lifecycle engine.
//!
//! Errors fall into two classes:
//! - infrastructure faults (signing, hashing, storage, timeout) which a caller
//!   may retry with the same input
//! - client-input faults (malformed, expired, wrong kind, replayed tokens,
//!   unknown subjects) which need new input before a retry can succeed
//!
//! The boundary layer maps errors through [`EngineError::code`] and
//! [`EngineError::client_message`] so it never has to match on strings.

use crate::jwt::TokenKind;
use std::time::Duration;
use thiserror::Error;

/// Message shown to clients for every rejected refresh token.
///
/// Replayed, forged, expired and malformed tokens all share it so a client
/// cannot use the response as an oracle.
pub const INVALID_REFRESH_MESSAGE: &str = "invalid refresh token";

/// Message shown to clients for infrastructure faults.
pub const UNAVAILABLE_MESSAGE: &str = "service temporarily unavailable";

/// Errors surfaced by the lifecycle engine and its collaborators.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EngineError {
    /// Token encoding or signing failed
    #[error("token signing failed: {0}")]
    SigningFailure(String),

    /// Fingerprint hashing failed or the input violated the length policy
    #[error("fingerprint hashing failed: {0}")]
    HashingFailure(String),

    /// Credential store backend fault
    #[error("storage failure during {operation}: {reason}")]
    StorageFailure {
        /// Store operation that failed
        operation: &'static str,
        /// Sanitized failure category
        reason: String,
    },

    /// Operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Token could not be parsed or its signature did not verify
    #[error("token malformed: {0}")]
    TokenMalformed(String),

    /// Token expiry has passed
    #[error("token expired")]
    TokenExpired,

    /// Token is valid but of the wrong kind
    #[error("token kind mismatch: expected {expected}, found {found}")]
    TokenKindMismatch {
        /// Kind the caller required
        expected: TokenKind,
        /// Kind carried by the token
        found: TokenKind,
    },

    /// Refresh token was already rotated, or its claims were forged
    #[error("refresh token replayed or forged")]
    RefreshReplayOrForged,

    /// Presenting address differs from the bound address
    #[error("bound address mismatch")]
    AddressMismatch {
        /// Address the credential is bound to
        expected: String,
        /// Address the request came from
        actual: String,
    },

    /// Credential record does not exist
    #[error("credential record not found")]
    RecordNotFound,

    /// Subject is unknown to the identity collaborator
    #[error("subject not found")]
    SubjectNotFound,
}

/// Stable error codes for boundary mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Signing fault
    SigningFailure,
    /// Hashing fault
    HashingFailure,
    /// Storage fault
    StorageFailure,
    /// Deadline exceeded
    Timeout,
    /// Unparseable or unverifiable token
    TokenMalformed,
    /// Expired token
    TokenExpired,
    /// Wrong token kind
    TokenKindMismatch,
    /// Replayed or forged refresh token
    RefreshReplayOrForged,
    /// Bound address mismatch
    AddressMismatch,
    /// Unknown credential record
    RecordNotFound,
    /// Unknown subject
    SubjectNotFound,
}

impl ErrorCode {
    /// String form of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SigningFailure => "TOKEN_SIGNING_FAILURE",
            Self::HashingFailure => "TOKEN_HASHING_FAILURE",
            Self::StorageFailure => "TOKEN_STORAGE_FAILURE",
            Self::Timeout => "TOKEN_TIMEOUT",
            Self::TokenMalformed => "TOKEN_MALFORMED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenKindMismatch => "TOKEN_KIND_MISMATCH",
            Self::RefreshReplayOrForged => "TOKEN_REFRESH_REUSED",
            Self::AddressMismatch => "TOKEN_ADDRESS_MISMATCH",
            Self::RecordNotFound => "TOKEN_RECORD_NOT_FOUND",
            Self::SubjectNotFound => "TOKEN_SUBJECT_NOT_FOUND",
        }
    }
}

impl EngineError {
    /// Stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SigningFailure(_) => ErrorCode::SigningFailure,
            Self::HashingFailure(_) => ErrorCode::HashingFailure,
            Self::StorageFailure { .. } => ErrorCode::StorageFailure,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::TokenMalformed(_) => ErrorCode::TokenMalformed,
            Self::TokenExpired => ErrorCode::TokenExpired,
            Self::TokenKindMismatch { .. } => ErrorCode::TokenKindMismatch,
            Self::RefreshReplayOrForged => ErrorCode::RefreshReplayOrForged,
            Self::AddressMismatch { .. } => ErrorCode::AddressMismatch,
            Self::RecordNotFound => ErrorCode::RecordNotFound,
            Self::SubjectNotFound => ErrorCode::SubjectNotFound,
        }
    }

    /// Whether retrying with the same input may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SigningFailure(_)
                | Self::HashingFailure(_)
                | Self::StorageFailure { .. }
                | Self::Timeout(_)
        )
    }

    /// Whether the client presented a token that must be rejected.
    ///
    /// Callers typically map these to an "unauthenticated" response.
    #[must_use]
    pub const fn is_rejected_token(&self) -> bool {
        matches!(
            self,
            Self::TokenMalformed(_)
                | Self::TokenExpired
                | Self::TokenKindMismatch { .. }
                | Self::RefreshReplayOrForged
        )
    }

    /// Client-visible message with internal details removed.
    #[must_use]
    pub const fn client_message(&self) -> &'static str {
        match self {
            Self::TokenMalformed(_)
            | Self::TokenExpired
            | Self::TokenKindMismatch { .. }
            | Self::RefreshReplayOrForged
            | Self::RecordNotFound => INVALID_REFRESH_MESSAGE,
            Self::AddressMismatch { .. } => "request address not permitted",
            Self::SubjectNotFound => "subject not found",
            Self::SigningFailure(_)
            | Self::HashingFailure(_)
            | Self::StorageFailure { .. }
            | Self::Timeout(_) => UNAVAILABLE_MESSAGE,
        }
    }

    /// Create a signing failure.
    #[must_use]
    pub fn signing(msg: impl Into<String>) -> Self {
        Self::SigningFailure(msg.into())
    }

    /// Create a hashing failure.
    #[must_use]
    pub fn hashing(msg: impl Into<String>) -> Self {
        Self::HashingFailure(msg.into())
    }

    /// Create a malformed token error.
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::TokenMalformed(msg.into())
    }
}
