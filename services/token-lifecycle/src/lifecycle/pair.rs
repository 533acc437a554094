use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Access and refresh tokens returned together.
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct TokenPair {
    /// Short-lived bearer token
    pub access_token: String,
    /// Single-use rotation token
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

impl TokenPair {
    pub(crate) fn new(access_token: String, refresh_token: String, access_ttl: Duration) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in: access_ttl
                .as_secs()
                .saturating_add(u64::from(access_ttl.subsec_nanos() > 0)),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}
