//! Proptest generators for engine inputs.

use proptest::prelude::*;
use std::time::Duration;
use token_lifecycle::jwt::TokenKind;

/// Generate subject identifiers (user guids and login names).
pub fn subject_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-f0-9]{8}-[a-f0-9]{4}-4[a-f0-9]{3}-[89ab][a-f0-9]{3}-[a-f0-9]{12}",
        "[a-z][a-z0-9._-]{2,30}",
    ]
}

/// Generate dotted IPv4 addresses.
pub fn ipv4_strategy() -> impl Strategy<Value = String> {
    any::<[u8; 4]>().prop_map(|[a, b, c, d]| format!("{a}.{b}.{c}.{d}"))
}

/// Generate IPv4 or IPv6 client addresses.
pub fn address_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => ipv4_strategy(),
        1 => any::<[u16; 8]>().prop_map(|segments| {
            segments
                .iter()
                .map(|s| format!("{s:x}"))
                .collect::<Vec<_>>()
                .join(":")
        }),
    ]
}

/// Generate positive token lifetimes up to thirty days, including
/// sub-second and fractional ones.
pub fn ttl_strategy() -> impl Strategy<Value = Duration> {
    prop_oneof![
        1 => (1u64..1_000).prop_map(Duration::from_millis),
        3 => (1u64..=2_592_000_000).prop_map(Duration::from_millis),
    ]
}

/// Generate a token kind.
pub fn token_kind_strategy() -> impl Strategy<Value = TokenKind> {
    prop_oneof![Just(TokenKind::Access), Just(TokenKind::Refresh)]
}

/// Generate strings that are not tokens minted by any codec.
pub fn garbage_token_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[A-Za-z0-9_-]{1,64}",
        "[A-Za-z0-9_-]{10,40}\\.[A-Za-z0-9_-]{10,40}\\.[A-Za-z0-9_-]{10,40}",
    ]
}
