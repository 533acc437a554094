use crate::clock::Clock;
use crate::error::EngineError;
use crate::jwt::claims::{TokenClaims, TokenKind};
use crate::storage::RecordId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;
use std::time::Duration;

/// Signs and verifies typed, expiring claim sets with HS256.
///
/// Expiry is checked against the injected [`Clock`] rather than the
/// library's system-time check so tests can drive time explicitly.
pub struct TokenCodec {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Create a codec for `issuer` signing with `secret`.
    pub fn new(issuer: impl Into<String>, secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            clock,
        }
    }

    /// Clock used for issued-at and expiry.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Mint a signed token.
    ///
    /// Claims carry whole seconds, so a fractional `ttl` is rounded up: a
    /// token minted with any non-zero lifetime is valid at its issue time.
    ///
    /// # Errors
    ///
    /// Returns `SigningFailure` if the expiry overflows or encoding fails.
    pub fn mint(
        &self,
        kind: TokenKind,
        subject: &str,
        bound_address: &str,
        record_reference: RecordId,
        ttl: Duration,
    ) -> Result<String, EngineError> {
        let now = self.clock.now().timestamp();
        let ttl = ttl
            .as_secs()
            .checked_add(u64::from(ttl.subsec_nanos() > 0))
            .and_then(|secs| i64::try_from(secs).ok())
            .ok_or_else(|| EngineError::signing("ttl out of range"))?;
        let exp = now
            .checked_add(ttl)
            .ok_or_else(|| EngineError::signing("expiry overflow"))?;

        let claims = TokenClaims {
            kind,
            rid: record_reference,
            ip: bound_address.to_string(),
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| EngineError::signing(e.to_string()))
    }

    /// Decode and verify a token of the expected kind.
    ///
    /// # Errors
    ///
    /// - `TokenMalformed` if parsing, signature or issuer checks fail
    /// - `TokenExpired` if the expiry has passed
    /// - `TokenKindMismatch` if the token is of the other kind
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, EngineError> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| EngineError::malformed(e.to_string()))?
            .claims;

        if claims.is_expired_at(self.clock.now().timestamp()) {
            return Err(EngineError::TokenExpired);
        }

        match (expected, claims.kind) {
            (TokenKind::Access, TokenKind::Access) | (TokenKind::Refresh, TokenKind::Refresh) => {
                Ok(claims)
            }
            (TokenKind::Access, found @ TokenKind::Refresh)
            | (TokenKind::Refresh, found @ TokenKind::Access) => {
                Err(EngineError::TokenKindMismatch { expected, found })
            }
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation
    }
}
