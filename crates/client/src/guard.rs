// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gate for protected views.
//!
//! Each protected view constructs one guard and drives it to a terminal
//! state on entry. The resolution is latched: re-rendering the same view
//! never re-runs validation or issues a second navigation signal.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::event::{SessionEvent, SignInReason};
use crate::gateway::Gateway;
use crate::store::{CredentialStore, Profile};

/// What a protected view should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Validation has not resolved yet; show a placeholder.
    Validating,
    /// The session checked out; render the protected content.
    Authenticated,
    /// The visitor must sign in; render nothing and navigate away.
    Redirecting,
}

/// Envelope of the session validation endpoint.
#[derive(Debug, Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    data: Option<Profile>,
}

/// Validates the session against the service once, on first entry.
pub struct SessionGuard {
    store: Arc<CredentialStore>,
    gateway: Arc<Gateway>,
    event_tx: broadcast::Sender<SessionEvent>,
    profile_path: String,
    resolved: OnceCell<GuardState>,
}

impl SessionGuard {
    pub(crate) fn new(
        store: Arc<CredentialStore>,
        gateway: Arc<Gateway>,
        event_tx: broadcast::Sender<SessionEvent>,
        profile_path: String,
    ) -> Self {
        Self { store, gateway, event_tx, profile_path, resolved: OnceCell::new() }
    }

    /// Current state without driving validation.
    pub fn state(&self) -> GuardState {
        self.resolved.get().copied().unwrap_or(GuardState::Validating)
    }

    /// Drive validation to a terminal state. The first call does the work;
    /// every later call returns the latched result.
    pub async fn resolve(&self) -> GuardState {
        *self.resolved.get_or_init(|| self.validate()).await
    }

    async fn validate(&self) -> GuardState {
        if self.store.load().is_none() {
            debug!("no stored session, sign-in required");
            let _ = self.event_tx.send(SessionEvent::SignInRequired(SignInReason::NoSession));
            return GuardState::Redirecting;
        }

        match self.gateway.get(&self.profile_path).await {
            Ok(resp) if resp.status().is_success() => {
                // The profile cache is display-only; an unreadable body
                // doesn't invalidate a session the service just accepted.
                match resp.json::<ProfileResponse>().await {
                    Ok(ProfileResponse { data: Some(profile) }) => {
                        self.store.save_profile(profile);
                    }
                    Ok(_) => debug!("profile response carried no user data"),
                    Err(e) => debug!("unreadable profile response: {e}"),
                }
                GuardState::Authenticated
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "session validation rejected");
                self.fail_validation()
            }
            // The gateway already cleared the session and signalled sign-in.
            Err(SessionError::SessionExpired) => GuardState::Redirecting,
            Err(SessionError::NoSession) => {
                let _ = self.event_tx.send(SessionEvent::SignInRequired(SignInReason::NoSession));
                GuardState::Redirecting
            }
            Err(e) => {
                warn!("session validation failed: {e}");
                self.fail_validation()
            }
        }
    }

    /// Terminal validation failure: the store is cleared before the
    /// navigation signal so no later page load can read half a session.
    fn fail_validation(&self) -> GuardState {
        self.store.clear();
        let _ = self.event_tx.send(SessionEvent::SignInRequired(SignInReason::ValidationFailed));
        GuardState::Redirecting
    }
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
