// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Facade over the session subsystem.
//!
//! The embedding application constructs one [`SessionManager`] at startup,
//! calls [`SessionManager::initialize`] once, and from then on issues API
//! calls through the gateway, gates protected views with
//! [`SessionManager::guard`], and reacts to broadcast [`SessionEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Method;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::event::{SessionEvent, SignInReason};
use crate::gateway::{CallOptions, Gateway};
use crate::guard::SessionGuard;
use crate::refresh::RefreshCoordinator;
use crate::store::{CredentialStore, Profile};

/// Point-in-time view of the session for UI consumption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Cached display identity, if a profile has been fetched.
    pub user: Option<Profile>,
    /// Whether a credential pair is currently stored.
    pub is_authenticated: bool,
    /// Whether startup initialization is still running.
    pub is_loading: bool,
}

/// Owns the session subsystem and exposes its public surface.
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    gateway: Arc<Gateway>,
    event_tx: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
    loading: AtomicBool,
}

impl SessionManager {
    /// Build the subsystem. Returns the manager and a receiver for session
    /// events.
    pub fn new(
        config: SessionConfig,
    ) -> anyhow::Result<(Arc<Self>, broadcast::Receiver<SessionEvent>)> {
        config.validate()?;

        let (event_tx, event_rx) = broadcast::channel(32);
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_default();

        let store = Arc::new(CredentialStore::open(config.persist_path.clone()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            config.clone(),
            Arc::clone(&store),
            http.clone(),
            event_tx.clone(),
        ));
        let gateway = Arc::new(Gateway::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&coordinator),
            http,
            event_tx.clone(),
        ));

        let manager = Arc::new(Self {
            config,
            store,
            coordinator,
            gateway,
            event_tx,
            shutdown: CancellationToken::new(),
            loading: AtomicBool::new(false),
        });
        Ok((manager, event_rx))
    }

    /// Run once at application start: inspects the stored session and sets
    /// up proactive renewal. A nearly expired token is renewed before the
    /// first timer is armed.
    pub async fn initialize(&self) {
        self.loading.store(true, Ordering::Release);
        self.coordinator.initialize(&self.shutdown).await;
        self.loading.store(false, Ordering::Release);
        debug!("session initialization complete");
    }

    /// Current `{ user, is_authenticated, is_loading }` view.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user: self.store.profile(),
            is_authenticated: self.store.load().is_some(),
            is_loading: self.loading.load(Ordering::Acquire),
        }
    }

    /// The authenticated call gateway.
    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::clone(&self.gateway)
    }

    /// A fresh gate for one protected view.
    pub fn guard(&self) -> SessionGuard {
        SessionGuard::new(
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            self.event_tx.clone(),
            self.config.profile_path.clone(),
        )
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// End the session.
    ///
    /// Server-side revocation is best-effort: a failure is logged and the
    /// local teardown (scheduler stop, store clear, sign-in signal) happens
    /// regardless.
    pub async fn logout(&self) {
        if let Some(pair) = self.store.load() {
            let body = serde_json::json!({ "refreshToken": pair.refresh_token });
            let opts = CallOptions { skip_retry: true, ..CallOptions::default() };
            match self
                .gateway
                .request(Method::POST, &self.config.logout_path, Some(body), opts)
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    debug!("server-side sign-out acknowledged");
                }
                Ok(resp) => warn!(status = %resp.status(), "server-side sign-out rejected"),
                Err(e) => warn!("server-side sign-out failed: {e}"),
            }
        }

        self.coordinator.stop();
        self.store.clear();
        info!("signed out");
        let _ = self.event_tx.send(SessionEvent::SignInRequired(SignInReason::LoggedOut));
    }

    /// Cancel all background work.
    pub fn shutdown(&self) {
        self.coordinator.stop();
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
