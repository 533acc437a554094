//! Prometheus counters for issuance, rotation and security events.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Tokens minted, by kind.
pub static TOKENS_ISSUED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_lifecycle_tokens_issued_total",
        "Total number of tokens minted",
        &["token_type"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Refresh attempts, by outcome.
pub static REFRESHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_lifecycle_refreshes_total",
        "Total number of refresh attempts",
        &["status"]
    )
    .expect("Failed to register refreshes metric")
});

/// Security-relevant events such as replays and address changes.
pub static SECURITY_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "token_lifecycle_security_events_total",
        "Total number of security events",
        &["event_type"]
    )
    .expect("Failed to register security_events metric")
});

/// Record a minted token.
pub fn record_token_issued(token_type: &str) {
    TOKENS_ISSUED.with_label_values(&[token_type]).inc();
}

/// Record a refresh outcome.
pub fn record_refresh(status: &str) {
    REFRESHES.with_label_values(&[status]).inc();
}

/// Record a security event.
pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_token_issued() {
        record_token_issued("access");
        assert!(TOKENS_ISSUED.with_label_values(&["access"]).get() > 0);
    }

    #[test]
    fn test_record_refresh() {
        let before = REFRESHES.with_label_values(&["rejected"]).get();
        record_refresh("rejected");
        assert!(REFRESHES.with_label_values(&["rejected"]).get() > before);
    }

    #[test]
    fn test_record_security_event() {
        record_security_event("REFRESH_REPLAY");
        assert!(SECURITY_EVENTS.with_label_values(&["REFRESH_REPLAY"]).get() > 0);
    }
}
