//! Salted one-way fingerprints of refresh tokens.
//!
//! A fingerprint is an Argon2id PHC string computed over the SHA-256 digest
//! of the token, keyed with a configured pepper.
//!
//! ## Length policy
//!
//! The raw token is never fed to the password hash. It is first reduced to
//! its 32-byte SHA-256 digest, so every byte of the token contributes and
//! nothing is truncated. Empty tokens and tokens longer than
//! [`MAX_TOKEN_LEN`] are rejected with `HashingFailure`.

use crate::error::EngineError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Longest token accepted for hashing, in bytes.
pub const MAX_TOKEN_LEN: usize = 8 * 1024;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Hashes and verifies refresh-token fingerprints.
pub struct FingerprintHasher {
    pepper: Zeroizing<Vec<u8>>,
    params: Params,
}

impl std::fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintHasher")
            .field("pepper", &"[redacted]")
            .field("params", &self.params)
            .finish()
    }
}

impl FingerprintHasher {
    /// Create a hasher with the given pepper and cost.
    ///
    /// # Errors
    ///
    /// Returns `HashingFailure` if the cost parameters are out of range.
    pub fn new(pepper: &[u8], cost: HashCost) -> Result<Self, EngineError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| EngineError::hashing(format!("invalid cost parameters: {e}")))?;

        Ok(Self {
            pepper: Zeroizing::new(pepper.to_vec()),
            params,
        })
    }

    /// Hash a token into a storable fingerprint with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns `HashingFailure` if the token violates the length policy or
    /// the underlying hash fails.
    pub fn hash(&self, token: &str) -> Result<String, EngineError> {
        let digest = Self::digest(token)?;
        let salt = SaltString::generate(&mut OsRng);

        self.argon2(self.params.clone())?
            .hash_password(digest.as_slice(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| EngineError::hashing(e.to_string()))
    }

    /// Check a token against a fingerprint.
    ///
    /// Returns false on mismatch, malformed fingerprints, or tokens outside
    /// the length policy. The final comparison is constant-time.
    #[must_use]
    pub fn verify(&self, token: &str, fingerprint: &str) -> bool {
        let Ok(digest) = Self::digest(token) else {
            return false;
        };
        let Ok(parsed) = PasswordHash::new(fingerprint) else {
            return false;
        };
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return false;
        }
        let (Some(salt), Some(expected)) = (parsed.salt, parsed.hash) else {
            return false;
        };
        let Ok(params) = Params::try_from(&parsed) else {
            return false;
        };
        let Ok(argon2) = self.argon2(params) else {
            return false;
        };
        let Ok(computed) = argon2.hash_password(digest.as_slice(), salt) else {
            return false;
        };

        computed.hash.is_some_and(|actual| {
            bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
        })
    }

    fn argon2(&self, params: Params) -> Result<Argon2<'_>, EngineError> {
        Argon2::new_with_secret(&self.pepper, Algorithm::Argon2id, Version::V0x13, params)
            .map_err(|e| EngineError::hashing(e.to_string()))
    }

    fn digest(token: &str) -> Result<Zeroizing<[u8; 32]>, EngineError> {
        if token.is_empty() {
            return Err(EngineError::hashing("empty token"));
        }
        if token.len() > MAX_TOKEN_LEN {
            return Err(EngineError::hashing(format!(
                "token exceeds {MAX_TOKEN_LEN} bytes"
            )));
        }
        Ok(Zeroizing::new(Sha256::digest(token.as_bytes()).into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> FingerprintHasher {
        let cost = HashCost {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        };
        FingerprintHasher::new(b"unit-test-pepper", cost).unwrap()
    }

    #[test]
    fn test_hash_is_salted() {
        let hasher = hasher();
        let first = hasher.hash("refresh-token").unwrap();
        let second = hasher.hash("refresh-token").unwrap();

        assert_ne!(first, second);
        assert!(hasher.verify("refresh-token", &first));
        assert!(hasher.verify("refresh-token", &second));
    }

    #[test]
    fn test_verify_rejects_other_token() {
        let hasher = hasher();
        let fingerprint = hasher.hash("token-a").unwrap();
        assert!(!hasher.verify("token-b", &fingerprint));
    }

    #[test]
    fn test_long_shared_prefix_is_not_truncated() {
        let hasher = hasher();
        let prefix = "x".repeat(200);
        let fingerprint = hasher.hash(&format!("{prefix}A")).unwrap();
        assert!(!hasher.verify(&format!("{prefix}B"), &fingerprint));
    }

    #[test]
    fn test_verify_rejects_malformed_fingerprint() {
        let hasher = hasher();
        assert!(!hasher.verify("token", ""));
        assert!(!hasher.verify("token", "not-a-phc-string"));
        assert!(!hasher.verify("token", "$argon2id$v=19$m=256,t=1,p=1$c2FsdA"));
    }

    #[test]
    fn test_pepper_is_part_of_the_hash() {
        let cost = HashCost {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        };
        let a = FingerprintHasher::new(b"pepper-a", cost).unwrap();
        let b = FingerprintHasher::new(b"pepper-b", cost).unwrap();

        let fingerprint = a.hash("token").unwrap();
        assert!(!b.verify("token", &fingerprint));
    }

    #[test]
    fn test_length_policy() {
        let hasher = hasher();
        assert!(matches!(hasher.hash(""), Err(EngineError::HashingFailure(_))));

        let oversized = "t".repeat(MAX_TOKEN_LEN + 1);
        assert!(matches!(
            hasher.hash(&oversized),
            Err(EngineError::HashingFailure(_))
        ));

        let fingerprint = hasher.hash("token").unwrap();
        assert!(!hasher.verify(&oversized, &fingerprint));
    }

    #[test]
    fn test_invalid_cost_rejected() {
        let cost = HashCost {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        };
        assert!(FingerprintHasher::new(b"pepper", cost).is_err());
    }

    #[test]
    fn test_debug_redacts_pepper() {
        let rendered = format!("{:?}", hasher());
        assert!(!rendered.contains("unit-test-pepper"));
    }
}
