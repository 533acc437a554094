//! Security event counters observed through whole refresh flows.
//!
//! Kept to a single test so no other test in this binary moves the
//! process-wide counters while it runs.

use std::sync::Arc;
use test_utils::TestEngineBuilder;
use token_lifecycle::config::AddressPolicy;
use token_lifecycle::metrics::SECURITY_EVENTS;
use token_lifecycle::EngineError;

fn security_events(event_type: &str) -> u64 {
    SECURITY_EVENTS.with_label_values(&[event_type]).get()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_address_change_counted_once_per_committed_rotation() {
    let fixture = Arc::new(TestEngineBuilder::new().build());
    let issued = fixture.engine.issue("user-1", "1.2.3.4").await.unwrap();
    let changed_before = security_events("ADDRESS_CHANGED");
    let replays_before = security_events("REFRESH_REPLAY_OR_FORGED");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fixture = fixture.clone();
            let token = issued.refresh_token.clone();
            tokio::spawn(async move { fixture.engine.refresh(&token, "9.9.9.9").await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(EngineError::RefreshReplayOrForged) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(security_events("ADDRESS_CHANGED") - changed_before, 1);
    assert_eq!(security_events("REFRESH_REPLAY_OR_FORGED") - replays_before, 7);

    let rejecting = TestEngineBuilder::new()
        .address_policy(AddressPolicy::Reject)
        .build();
    let issued = rejecting.engine.issue("user-2", "1.2.3.4").await.unwrap();
    let changed_before = security_events("ADDRESS_CHANGED");
    let rejected_before = security_events("ADDRESS_REJECTED");

    let result = rejecting.engine.refresh(&issued.refresh_token, "9.9.9.9").await;

    assert!(matches!(result, Err(EngineError::AddressMismatch { .. })));
    assert_eq!(security_events("ADDRESS_CHANGED"), changed_before);
    assert_eq!(security_events("ADDRESS_REJECTED") - rejected_before, 1);
}
