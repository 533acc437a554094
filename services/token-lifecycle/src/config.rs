//! Engine configuration.
//!
//! Loaded from environment variables (with `.env` support) and validated at
//! startup. Secrets missing from the environment are replaced by random
//! values suitable for development only.

use crate::fingerprint::HashCost;
use crate::telemetry::TracingConfig;
use base64::Engine as _;
use rand::RngCore;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

/// Configuration errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable could not be parsed
    #[error("invalid {name}: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Parse failure
        reason: String,
    },

    /// A variable required by the selected options is missing
    #[error("missing {0}")]
    Missing(&'static str),
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Handling of a refresh presented from an address other than the bound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressPolicy {
    /// Notify the subject and continue the rotation
    #[default]
    Notify,
    /// Reject the refresh without consuming the token
    Reject,
}

impl FromStr for AddressPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "notify" => Ok(Self::Notify),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::invalid(
                "ADDRESS_POLICY",
                format!("unknown policy {other:?}"),
            )),
        }
    }
}

/// Credential store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// In-process store
    #[default]
    Memory,
    /// Redis store
    Redis {
        /// Connection URL
        url: String,
    },
    /// Postgres store
    Postgres {
        /// Connection URL
        url: String,
        /// Pool size
        max_connections: u32,
    },
}

/// Fingerprint hashing settings.
#[derive(Clone)]
pub struct FingerprintConfig {
    /// Secret mixed into every fingerprint
    pub pepper: Zeroizing<Vec<u8>>,
    /// Argon2id cost
    pub cost: HashCost,
}

/// Engine configuration.
#[derive(Clone)]
pub struct Config {
    /// `iss` claim of minted tokens
    pub jwt_issuer: String,
    /// HS256 signing secret
    pub signing_secret: Zeroizing<Vec<u8>>,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// Fingerprint settings
    pub fingerprint: FingerprintConfig,
    /// Address-change handling
    pub address_policy: AddressPolicy,
    /// Deadline for each engine operation
    pub operation_timeout: Duration,
    /// Credential store backend
    pub store: StoreBackend,
    /// Logging settings
    pub tracing: TracingConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("signing_secret", &"[redacted]")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("fingerprint_pepper", &"[redacted]")
            .field("fingerprint_cost", &self.fingerprint.cost)
            .field("address_policy", &self.address_policy)
            .field("operation_timeout", &self.operation_timeout)
            .field("store", &redacted_store(&self.store))
            .field("tracing", &self.tracing)
            .finish()
    }
}

fn redacted_store(store: &StoreBackend) -> &'static str {
    match store {
        StoreBackend::Memory => "memory",
        StoreBackend::Redis { .. } => "redis",
        StoreBackend::Postgres { .. } => "postgres",
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jwt_issuer: "token-lifecycle".to_string(),
            signing_secret: random_secret(),
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(604_800),
            fingerprint: FingerprintConfig {
                pepper: random_secret(),
                cost: HashCost::default(),
            },
            address_policy: AddressPolicy::default(),
            operation_timeout: Duration::from_secs(5),
            store: StoreBackend::default(),
            tracing: TracingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is invalid or a selected backend lacks
    /// its URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let jwt_issuer = lookup("JWT_ISSUER").unwrap_or(defaults.jwt_issuer);
        let signing_secret = parse_secret(&lookup, "JWT_SIGNING_SECRET")?;

        let access_token_ttl = parse_ttl(&lookup, "ACCESS_TOKEN_TTL", defaults.access_token_ttl)?;
        let refresh_token_ttl =
            parse_ttl(&lookup, "REFRESH_TOKEN_TTL", defaults.refresh_token_ttl)?;

        let fingerprint = FingerprintConfig {
            pepper: parse_secret(&lookup, "FINGERPRINT_PEPPER")?,
            cost: HashCost {
                memory_kib: parse_env(&lookup, "FINGERPRINT_MEMORY_KIB", defaults.fingerprint.cost.memory_kib)?,
                iterations: parse_env(&lookup, "FINGERPRINT_ITERATIONS", defaults.fingerprint.cost.iterations)?,
                parallelism: parse_env(&lookup, "FINGERPRINT_PARALLELISM", defaults.fingerprint.cost.parallelism)?,
            },
        };

        let address_policy =
            parse_env(&lookup, "ADDRESS_POLICY", defaults.address_policy)?;
        let operation_timeout = parse_ttl(&lookup, "OPERATION_TIMEOUT", defaults.operation_timeout)?;

        let store = match lookup("STORE_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "redis" => StoreBackend::Redis {
                url: lookup("REDIS_URL").ok_or(ConfigError::Missing("REDIS_URL"))?,
            },
            "postgres" => StoreBackend::Postgres {
                url: lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
                max_connections: parse_env(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            other => {
                return Err(ConfigError::invalid(
                    "STORE_BACKEND",
                    format!("unknown backend {other:?}"),
                ))
            }
        };

        let tracing = TracingConfig::default()
            .with_log_level(lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()))
            .with_json_output(parse_env(&lookup, "LOG_JSON", false)?);

        Ok(Self {
            jwt_issuer,
            signing_secret,
            access_token_ttl,
            refresh_token_ttl,
            fingerprint,
            address_policy,
            operation_timeout,
            store,
            tracing,
        })
    }
}

/// Parse a variable with a default value.
fn parse_env<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(name, e.to_string())),
        None => Ok(default),
    }
}

/// Parse a duration in whole seconds, rejecting zero.
fn parse_ttl<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_env(lookup, name, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::invalid(name, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

/// Parse a base64 secret, falling back to a random development value.
fn parse_secret<F>(lookup: &F, name: &'static str) -> Result<Zeroizing<Vec<u8>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| ConfigError::invalid(name, e.to_string()))?;
            if bytes.len() < 32 {
                return Err(ConfigError::invalid(
                    name,
                    format!("must be at least 32 bytes, got {}", bytes.len()),
                ));
            }
            Ok(Zeroizing::new(bytes))
        }
        None => {
            warn!(variable = name, "Secret not set, generating a random development value");
            Ok(random_secret())
        }
    }
}

fn random_secret() -> Zeroizing<Vec<u8>> {
    let mut secret = Zeroizing::new(vec![0u8; 32]);
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.jwt_issuer, "token-lifecycle");
        assert_eq!(config.access_token_ttl, Duration::from_secs(900));
        assert_eq!(config.refresh_token_ttl, Duration::from_secs(604_800));
        assert_eq!(config.address_policy, AddressPolicy::Notify);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.signing_secret.len(), 32);
    }

    #[test]
    fn test_random_secrets_differ() {
        let a = Config::from_lookup(lookup(&[])).unwrap();
        let b = Config::from_lookup(lookup(&[])).unwrap();
        assert_ne!(*a.signing_secret, *b.signing_secret);
        assert_ne!(*a.signing_secret, *a.fingerprint.pepper);
    }

    #[test]
    fn test_overrides() {
        let secret = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let config = Config::from_lookup(lookup(&[
            ("JWT_ISSUER", "auth.example"),
            ("JWT_SIGNING_SECRET", secret.as_str()),
            ("ACCESS_TOKEN_TTL", "60"),
            ("ADDRESS_POLICY", "Reject"),
            ("FINGERPRINT_MEMORY_KIB", "1024"),
            ("STORE_BACKEND", "redis"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("LOG_JSON", "true"),
        ]))
        .unwrap();

        assert_eq!(config.jwt_issuer, "auth.example");
        assert_eq!(*config.signing_secret, vec![7u8; 32]);
        assert_eq!(config.access_token_ttl, Duration::from_secs(60));
        assert_eq!(config.address_policy, AddressPolicy::Reject);
        assert_eq!(config.fingerprint.cost.memory_kib, 1024);
        assert!(config.tracing.json_output);
        assert!(matches!(config.store, StoreBackend::Redis { .. }));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = Config::from_lookup(lookup(&[("REFRESH_TOKEN_TTL", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "REFRESH_TOKEN_TTL",
                ..
            }
        ));
    }

    #[test]
    fn test_short_secret_rejected() {
        let secret = base64::engine::general_purpose::STANDARD.encode([1u8; 8]);
        assert!(Config::from_lookup(lookup(&[("FINGERPRINT_PEPPER", secret.as_str())])).is_err());
    }

    #[test]
    fn test_backend_requires_url() {
        assert_eq!(
            Config::from_lookup(lookup(&[("STORE_BACKEND", "postgres")])).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        assert!(Config::from_lookup(lookup(&[("STORE_BACKEND", "mongo")])).is_err());
    }

    #[test]
    fn test_address_policy_parsing() {
        assert_eq!("notify".parse::<AddressPolicy>().unwrap(), AddressPolicy::Notify);
        assert_eq!("REJECT".parse::<AddressPolicy>().unwrap(), AddressPolicy::Reject);
        assert!("block".parse::<AddressPolicy>().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://admin:hunter2@db/tokens"),
        ]))
        .unwrap();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[redacted]"));
        assert!(!rendered.contains("hunter2"));
    }
}
