//! Property-based tests for issuance and refresh rotation.
//!
//! Property 1: Rotation yields a new refresh token
//! Property 2: A rotated refresh token can never be reused
//! Property 3: Address changes notify exactly once
//! Property 4: Minted claims decode to their inputs
//! Property 5: Arbitrary non-token input is malformed

use proptest::prelude::*;
use std::sync::Arc;
use test_utils::{
    address_strategy, garbage_token_strategy, ipv4_strategy, subject_strategy, test_codec,
    token_kind_strategy, ttl_strategy, RecordingNotifier, TestEngineBuilder,
};
use token_lifecycle::clock::ManualClock;
use token_lifecycle::EngineError;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property 1: Rotation yields a new refresh token
    #[test]
    fn prop_refresh_returns_new_token(
        subject in subject_strategy(),
        address in address_strategy(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let fixture = TestEngineBuilder::new().build();
            let issued = fixture.engine.issue(&subject, &address).await.unwrap();

            let rotated = fixture.engine.refresh(&issued.refresh_token, &address).await.unwrap();

            prop_assert_ne!(&rotated.refresh_token, &issued.refresh_token);
            prop_assert_ne!(&rotated.access_token, &issued.access_token);
            Ok(())
        })?;
    }

    /// Property 2: A rotated refresh token can never be reused
    #[test]
    fn prop_rotated_token_is_rejected(
        subject in subject_strategy(),
        address in ipv4_strategy(),
        elapsed_secs in 0u64..3_600,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let fixture = TestEngineBuilder::new().build();
            let issued = fixture.engine.issue(&subject, &address).await.unwrap();
            fixture.engine.refresh(&issued.refresh_token, &address).await.unwrap();

            fixture.clock.advance(std::time::Duration::from_secs(elapsed_secs));
            let replay = fixture.engine.refresh(&issued.refresh_token, &address).await;

            prop_assert!(matches!(replay, Err(EngineError::RefreshReplayOrForged)));
            Ok(())
        })?;
    }

    /// Property 3: Address changes notify exactly once
    #[test]
    fn prop_address_change_notifies_once(
        subject in subject_strategy(),
        original in ipv4_strategy(),
        moved in ipv4_strategy(),
    ) {
        prop_assume!(original != moved);

        let rt = runtime();
        rt.block_on(async {
            let notifier = Arc::new(RecordingNotifier::new());
            let fixture = TestEngineBuilder::new().notifier(notifier.clone()).build();

            let issued = fixture.engine.issue(&subject, &original).await.unwrap();
            fixture.engine.refresh(&issued.refresh_token, &moved).await.unwrap();

            let calls = notifier.calls().await;
            prop_assert_eq!(calls.len(), 1);
            prop_assert_eq!(&calls[0].subject, &subject);
            prop_assert_eq!(&calls[0].previous_address, &original);
            prop_assert_eq!(&calls[0].current_address, &moved);
            Ok(())
        })?;
    }

    /// Property 4: Minted claims decode to their inputs
    #[test]
    fn prop_mint_decode_round_trip(
        kind in token_kind_strategy(),
        subject in subject_strategy(),
        address in address_strategy(),
        ttl in ttl_strategy(),
    ) {
        let codec = test_codec(Arc::new(ManualClock::starting_now()));
        let record_id = uuid::Uuid::new_v4();

        let token = codec.mint(kind, &subject, &address, record_id, ttl).unwrap();
        let claims = codec.decode(&token, kind).unwrap();

        prop_assert_eq!(claims.kind, kind);
        prop_assert_eq!(claims.sub, subject);
        prop_assert_eq!(claims.ip, address);
        prop_assert_eq!(claims.rid, record_id);
        let whole_secs = ttl.as_millis().div_ceil(1_000);
        prop_assert_eq!(claims.exp - claims.iat, i64::try_from(whole_secs).unwrap());
    }

    /// Property 5: Arbitrary non-token input is malformed
    #[test]
    fn prop_garbage_is_malformed(
        garbage in garbage_token_strategy(),
        address in ipv4_strategy(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let fixture = TestEngineBuilder::new().build();
            fixture.engine.issue("user-1", &address).await.unwrap();

            let result = fixture.engine.refresh(&garbage, &address).await;

            prop_assert!(matches!(result, Err(EngineError::TokenMalformed(_))));
            prop_assert_eq!(fixture.store.len().await, 1);
            Ok(())
        })?;
    }
}
