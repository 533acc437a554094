//! Token codec: typed, signed, expiring claim sets.

pub mod claims;
pub mod codec;

pub use claims::{TokenClaims, TokenKind};
pub use codec::TokenCodec;
