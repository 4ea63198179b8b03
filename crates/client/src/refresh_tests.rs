// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_support::{
    harness, mock_refresh_server, next_sign_in, pair, refresh_ok_body, serve, test_config,
    token_expiring_in,
};

#[tokio::test]
async fn refresh_persists_new_pair_and_emits() {
    let new_access = token_expiring_in(3600);
    let (addr, hits) =
        mock_refresh_server(vec![(200, refresh_ok_body(&new_access, "refresh-2"))]).await;
    let mut h = harness(test_config(addr));
    h.store.save(pair("stale-access", "refresh-1"));

    let outcome = h.coordinator.refresh().await;

    assert_eq!(outcome, RefreshOutcome::Refreshed);
    assert_eq!(hits.load(Ordering::Relaxed), 1);
    let stored = h.store.load().expect("pair");
    assert_eq!(stored.access_token, new_access);
    assert_eq!(stored.refresh_token, "refresh-2");
    assert_eq!(h.events.try_recv().expect("event"), SessionEvent::TokensRefreshed);
}

#[tokio::test]
async fn concurrent_refresh_is_single_flight() {
    let body = refresh_ok_body(&token_expiring_in(3600), "refresh-2");
    let hits = Arc::new(AtomicU32::new(0));
    let hits_clone = Arc::clone(&hits);

    // Refresh endpoint that answers slowly, keeping the first exchange in
    // flight while the second caller arrives.
    let app = Router::new().route(
        "/auth/refresh",
        post(move |_body: String| {
            let hits = Arc::clone(&hits_clone);
            let body = body.clone();
            async move {
                hits.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(200)).await;
                body
            }
        }),
    );
    let addr = serve(app).await;

    let h = harness(test_config(addr));
    h.store.save(pair("stale-access", "refresh-1"));

    let first = tokio::spawn({
        let coordinator = Arc::clone(&h.coordinator);
        async move { coordinator.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.coordinator.refresh().await, RefreshOutcome::AlreadyInFlight);
    assert_eq!(first.await.expect("join"), RefreshOutcome::Refreshed);
    assert_eq!(hits.load(Ordering::Relaxed), 1, "losing caller must not reach the network");
}

#[tokio::test]
async fn in_flight_slot_is_released_after_failure() {
    let (addr, hits) = mock_refresh_server(vec![(500, "{}".to_owned())]).await;
    let h = harness(test_config(addr));
    h.store.save(pair("stale-access", "refresh-1"));

    assert_eq!(h.coordinator.refresh().await, RefreshOutcome::Failed);
    // A failed exchange must not leave the coordinator stuck in-flight.
    assert_eq!(h.coordinator.refresh().await, RefreshOutcome::Failed);
    assert_eq!(hits.load(Ordering::Relaxed), 2);
    assert!(h.store.load().is_some(), "transient failure must not clear the session");
}

#[tokio::test]
async fn rejected_refresh_clears_session() {
    let (addr, _hits) = mock_refresh_server(vec![(403, "{}".to_owned())]).await;
    let mut h = harness(test_config(addr));
    h.store.save(pair("stale-access", "dead-refresh"));
    h.store.save_profile(crate::store::Profile {
        name: "Maya".to_owned(),
        email: "maya@example.test".to_owned(),
    });

    assert_eq!(h.coordinator.refresh().await, RefreshOutcome::Rejected);

    assert!(h.store.load().is_none());
    assert!(h.store.profile().is_none());
    assert_eq!(next_sign_in(&mut h.events).await, SignInReason::RefreshRejected);
}

#[tokio::test]
async fn unauthorized_refresh_is_also_terminal() {
    let (addr, _hits) = mock_refresh_server(vec![(401, "{}".to_owned())]).await;
    let h = harness(test_config(addr));
    h.store.save(pair("stale-access", "dead-refresh"));

    assert_eq!(h.coordinator.refresh().await, RefreshOutcome::Rejected);
    assert!(h.store.load().is_none());
}

#[tokio::test]
async fn refresh_without_session_makes_no_call() {
    let (addr, hits) = mock_refresh_server(vec![(200, "{}".to_owned())]).await;
    let h = harness(test_config(addr));

    assert_eq!(h.coordinator.refresh().await, RefreshOutcome::NoSession);
    assert_eq!(hits.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn malformed_refresh_body_is_transient() {
    let (addr, _hits) =
        mock_refresh_server(vec![(200, r#"{ "success": false }"#.to_owned())]).await;
    let h = harness(test_config(addr));
    h.store.save(pair("stale-access", "refresh-1"));

    assert_eq!(h.coordinator.refresh().await, RefreshOutcome::Failed);
    let stored = h.store.load().expect("pair");
    assert_eq!(stored.access_token, "stale-access");
}

#[tokio::test]
async fn schedule_delay_clamps_to_floor() {
    let h = harness(SessionConfig::new("http://127.0.0.1:9"));
    // 30s of life minus a 2-minute margin would go negative; the floor wins.
    let delay = h.coordinator.schedule_delay_ms(&token_expiring_in(30));
    assert_eq!(delay, 5_000);
}

#[tokio::test]
async fn schedule_delay_renews_ahead_of_expiry() {
    let h = harness(SessionConfig::new("http://127.0.0.1:9"));
    let delay = h.coordinator.schedule_delay_ms(&token_expiring_in(600));
    assert!(
        (478_000..=480_000).contains(&delay),
        "expected ten minutes minus the margin, got {delay}ms"
    );
}

#[tokio::test]
async fn schedule_delay_for_unreadable_token_uses_fallback() {
    let h = harness(SessionConfig::new("http://127.0.0.1:9"));
    let delay = h.coordinator.schedule_delay_ms("garbage");
    assert_eq!(delay, 900_000 - 120_000);
}

#[tokio::test]
async fn initialize_with_near_expiry_renews_before_scheduling() {
    let fresh_access = token_expiring_in(3600);
    let (addr, hits) =
        mock_refresh_server(vec![(200, refresh_ok_body(&fresh_access, "refresh-2"))]).await;
    let h = harness(test_config(addr));
    // One minute of life is inside the two-minute renewal margin.
    h.store.save(pair(&token_expiring_in(60), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.initialize(&shutdown).await;

    assert_eq!(hits.load(Ordering::Relaxed), 1, "renewal must happen during initialize");
    assert_eq!(h.store.load().expect("pair").access_token, fresh_access);
    h.coordinator.stop();
}

#[tokio::test]
async fn initialize_with_ample_life_does_not_renew() {
    let (addr, hits) = mock_refresh_server(vec![(200, "{}".to_owned())]).await;
    let h = harness(test_config(addr));
    h.store.save(pair(&token_expiring_in(3600), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.initialize(&shutdown).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(hits.load(Ordering::Relaxed), 0);
    h.coordinator.stop();
}

#[tokio::test]
async fn initialize_without_session_does_nothing() {
    let (addr, hits) = mock_refresh_server(vec![(200, "{}".to_owned())]).await;
    let h = harness(test_config(addr));

    let shutdown = CancellationToken::new();
    h.coordinator.initialize(&shutdown).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(hits.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn initialize_does_not_schedule_after_failed_startup_renewal() {
    let (addr, hits) = mock_refresh_server(vec![(500, "{}".to_owned())]).await;
    let h = harness(test_config(addr));
    h.store.save(pair(&token_expiring_in(60), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.initialize(&shutdown).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Exactly the startup attempt; no scheduler retrying in the background.
    assert_eq!(hits.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn scheduler_renews_and_rearms_on_success() {
    let fresh_access = token_expiring_in(3600);
    let (addr, hits) =
        mock_refresh_server(vec![(200, refresh_ok_body(&fresh_access, "refresh-2"))]).await;
    let mut h = harness(test_config(addr));
    h.store.save(pair(&token_expiring_in(60), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.start(&shutdown);

    let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
        .await
        .expect("timed out")
        .expect("event");
    assert_eq!(event, SessionEvent::TokensRefreshed);

    // The fresh token has an hour of life; the rearmed timer is far out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::Relaxed), 1);
    h.coordinator.stop();
}

#[tokio::test]
async fn scheduler_gives_up_after_one_retry() {
    let (addr, hits) =
        mock_refresh_server(vec![(500, "{}".to_owned()), (500, "{}".to_owned())]).await;
    let mut h = harness(test_config(addr));
    h.store.save(pair(&token_expiring_in(60), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.start(&shutdown);

    let reason = tokio::time::timeout(Duration::from_secs(5), next_sign_in(&mut h.events))
        .await
        .expect("timed out");

    assert_eq!(reason, SignInReason::RenewalFailed);
    assert_eq!(hits.load(Ordering::Relaxed), 2, "one scheduled attempt plus one retry");
    assert!(h.store.load().is_none());
    assert!(h.store.profile().is_none());
}

#[tokio::test]
async fn scheduler_recovers_when_the_retry_succeeds() {
    let fresh_access = token_expiring_in(3600);
    let (addr, hits) = mock_refresh_server(vec![
        (500, "{}".to_owned()),
        (200, refresh_ok_body(&fresh_access, "refresh-2")),
    ])
    .await;
    let mut h = harness(test_config(addr));
    h.store.save(pair(&token_expiring_in(60), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.start(&shutdown);

    let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
        .await
        .expect("timed out")
        .expect("event");
    assert_eq!(event, SessionEvent::TokensRefreshed);
    assert_eq!(hits.load(Ordering::Relaxed), 2);
    assert_eq!(h.store.load().expect("pair").access_token, fresh_access);
    h.coordinator.stop();
}

#[tokio::test]
async fn schedule_next_refresh_replaces_the_pending_timer() {
    let fresh_access = token_expiring_in(3600);
    let (addr, hits) =
        mock_refresh_server(vec![(200, refresh_ok_body(&fresh_access, "refresh-2"))]).await;
    let mut h = harness(test_config(addr));
    h.store.save(pair(&token_expiring_in(3600), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.start(&shutdown);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hits.load(Ordering::Relaxed), 0, "timer is armed nearly an hour out");

    // Swap in a nearly expired token and ask for a recomputed schedule.
    h.store.save(pair(&token_expiring_in(30), "refresh-1"));
    h.coordinator.schedule_next_refresh();

    let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
        .await
        .expect("timed out")
        .expect("event");
    assert_eq!(event, SessionEvent::TokensRefreshed);
    assert_eq!(hits.load(Ordering::Relaxed), 1);
    h.coordinator.stop();
}

#[tokio::test]
async fn stop_cancels_the_pending_timer() {
    let (addr, hits) = mock_refresh_server(vec![(200, "{}".to_owned())]).await;
    let h = harness(test_config(addr));
    h.store.save(pair(&token_expiring_in(60), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.start(&shutdown);
    h.coordinator.stop();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn restart_replaces_the_previous_scheduler() {
    let fresh_access = token_expiring_in(3600);
    let (addr, hits) =
        mock_refresh_server(vec![(200, refresh_ok_body(&fresh_access, "refresh-2"))]).await;
    let mut h = harness(test_config(addr));
    h.store.save(pair(&token_expiring_in(60), "refresh-1"));

    let shutdown = CancellationToken::new();
    h.coordinator.start(&shutdown);
    h.coordinator.start(&shutdown);

    let event = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
        .await
        .expect("timed out")
        .expect("event");
    assert_eq!(event, SessionEvent::TokensRefreshed);

    // Only the surviving scheduler fired; the replaced one was cancelled.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::Relaxed), 1);
    h.coordinator.stop();
}
