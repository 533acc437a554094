use crate::storage::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant separating access tokens from refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived bearer credential
    Access,
    /// Single-use credential exchanged for a new pair
    Refresh,
}

impl TokenKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded claim set shared by access and refresh tokens.
///
/// Only non-sensitive identifiers are carried; the refresh fingerprint never
/// leaves the credential store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Token kind
    pub kind: TokenKind,
    /// Credential record the token is bound to
    pub rid: RecordId,
    /// Network address bound at mint time
    pub ip: String,
    /// Subject identifier
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// Unique token identifier
    pub jti: String,
}

impl TokenClaims {
    /// Whether the token has expired at `timestamp`.
    #[must_use]
    pub const fn is_expired_at(&self, timestamp: i64) -> bool {
        timestamp >= self.exp
    }
}
