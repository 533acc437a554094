//! Token lifecycle engine.
//!
//! Issues access/refresh token pairs bound to a client address and rotates
//! refresh tokens strictly once: each refresh token's salted fingerprint is
//! the only credential accepted for the next rotation, and a successful
//! rotation atomically replaces it.
//!
//! The engine is built from four parts: the token codec ([`jwt`]), the
//! fingerprint hasher ([`fingerprint`]), a credential store ([`storage`])
//! and the orchestrating [`lifecycle::LifecycleEngine`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod jwt;
pub mod lifecycle;
pub mod metrics;
pub mod storage;
pub mod telemetry;

// Re-exports for convenience
pub use config::Config;
pub use error::EngineError;
pub use lifecycle::{LifecycleEngine, TokenPair};
