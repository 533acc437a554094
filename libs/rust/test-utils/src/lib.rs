//! Shared test utilities for the token lifecycle engine.
//!
//! This crate provides:
//! - Proptest generators for subjects, addresses and lifetimes
//! - Mock collaborators (notifier, resolver, failing or slow stores)
//! - Fixtures that assemble an engine with a manual clock and cheap hashing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use fixtures::*;
pub use generators::*;
pub use mocks::*;
