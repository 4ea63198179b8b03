// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders, mock auth services, and a
//! pre-wired component harness.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::SessionConfig;
use crate::event::{SessionEvent, SignInReason};
use crate::gateway::Gateway;
use crate::refresh::RefreshCoordinator;
use crate::store::{CredentialPair, CredentialStore};

/// Build a JWT-shaped token whose payload carries the given claims.
pub fn token_with_claims(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{header}.{payload}.sig")
}

/// Token whose `exp` claim lands `secs_from_now` seconds from the wall clock.
pub fn token_expiring_in(secs_from_now: i64) -> String {
    let exp = (crate::expiry::epoch_ms() / 1000) as i64 + secs_from_now;
    token_with_claims(&serde_json::json!({ "sub": "cust-1", "exp": exp }))
}

/// Credential pair from plain strings.
pub fn pair(access: &str, refresh: &str) -> CredentialPair {
    CredentialPair { access_token: access.to_owned(), refresh_token: refresh.to_owned() }
}

/// Successful refresh exchange body carrying the given tokens.
pub fn refresh_ok_body(access: &str, refresh: &str) -> String {
    serde_json::json!({
        "success": true,
        "data": { "accessToken": access, "refreshToken": refresh }
    })
    .to_string()
}

/// Bind an ephemeral port and serve `app` in the background.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

/// Start a mock auth service whose `POST /auth/refresh` serves the scripted
/// `(status, body)` responses in order, repeating the last one.
pub async fn mock_refresh_server(responses: Vec<(u16, String)>) -> (SocketAddr, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let hits_clone = Arc::clone(&hits);
    let responses = Arc::new(responses);

    let app = Router::new().route(
        "/auth/refresh",
        post(move |_body: String| {
            let hits = Arc::clone(&hits_clone);
            let responses = Arc::clone(&responses);
            async move {
                let idx = hits.fetch_add(1, Ordering::Relaxed) as usize;
                let (status, body) = if idx < responses.len() {
                    responses[idx].clone()
                } else {
                    responses.last().cloned().unwrap_or((500, "{}".to_owned()))
                };
                (
                    axum::http::StatusCode::from_u16(status)
                        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
                    body,
                )
            }
        }),
    );

    (serve(app).await, hits)
}

/// Config pointing at a mock service, with millisecond-scale scheduling
/// knobs so scheduler tests never wait on the production policy.
pub fn test_config(addr: SocketAddr) -> SessionConfig {
    let mut config = SessionConfig::new(format!("http://{addr}"));
    config.min_schedule_ms = 10;
    config.retry_delay_ms = 20;
    config
}

/// The session components wired together over an in-memory store.
pub struct Harness {
    pub store: Arc<CredentialStore>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub gateway: Arc<Gateway>,
    pub event_tx: broadcast::Sender<SessionEvent>,
    pub events: broadcast::Receiver<SessionEvent>,
}

pub fn harness(config: SessionConfig) -> Harness {
    let (event_tx, events) = broadcast::channel(32);
    let http = reqwest::Client::new();
    let store = Arc::new(CredentialStore::in_memory());
    let coordinator = Arc::new(RefreshCoordinator::new(
        config.clone(),
        Arc::clone(&store),
        http.clone(),
        event_tx.clone(),
    ));
    let gateway = Arc::new(Gateway::new(
        config,
        Arc::clone(&store),
        Arc::clone(&coordinator),
        http,
        event_tx.clone(),
    ));
    Harness { store, coordinator, gateway, event_tx, events }
}

/// Wait for the next sign-in signal, skipping other events.
pub async fn next_sign_in(rx: &mut broadcast::Receiver<SessionEvent>) -> SignInReason {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::SignInRequired(reason)) => return reason,
            Ok(_) => continue,
            Err(e) => panic!("event channel closed: {e}"),
        }
    }
}
