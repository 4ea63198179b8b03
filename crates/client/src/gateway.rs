// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request gateway.
//!
//! Every outbound API call goes through here: the current access token is
//! attached as a bearer credential, a 401 triggers one renewal and one
//! replay of the original call, and a session that cannot be recovered is
//! cleared before the error reaches the caller.

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{SessionEvent, SignInReason};
use crate::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::store::CredentialStore;

/// Per-call switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Issue the call without attaching credentials (public endpoints).
    pub skip_auth: bool,
    /// Do not renew-and-replay on a 401; return the response as-is.
    pub skip_retry: bool,
}

/// Wraps outbound calls with the current access token.
pub struct Gateway {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    http: reqwest::Client,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Gateway {
    pub fn new(
        config: SessionConfig,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        http: reqwest::Client,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self { config, store, coordinator, http, event_tx }
    }

    /// Issue a call against the API.
    ///
    /// With credentials attached, a 401 response triggers one renewal and
    /// one replay of the original call, never more, so a service that keeps
    /// rejecting the token cannot recurse. The replayed call runs with
    /// `skip_retry` semantics and its response is returned untouched.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        opts: CallOptions,
    ) -> Result<Response, SessionError> {
        if opts.skip_auth {
            return self.dispatch(method, path, body.as_ref(), None).await;
        }

        let Some(pair) = self.store.load() else {
            return Err(SessionError::NoSession);
        };

        let resp = self
            .dispatch(method.clone(), path, body.as_ref(), Some(&pair.access_token))
            .await?;
        if resp.status() != StatusCode::UNAUTHORIZED || opts.skip_retry {
            return Ok(resp);
        }

        debug!(path, "access token rejected, renewing");
        match self.coordinator.refresh().await {
            RefreshOutcome::Refreshed => {}
            // The coordinator already cleared the session and signalled
            // sign-in; don't signal twice.
            RefreshOutcome::Rejected => return Err(SessionError::SessionExpired),
            _ => {
                warn!(path, "renewal failed mid-call, ending session");
                self.store.clear();
                let _ = self
                    .event_tx
                    .send(SessionEvent::SignInRequired(SignInReason::SessionExpired));
                return Err(SessionError::SessionExpired);
            }
        }

        let Some(pair) = self.store.load() else {
            return Err(SessionError::SessionExpired);
        };
        // The one replay. A second 401 goes back to the caller untouched.
        self.dispatch(method, path, body.as_ref(), Some(&pair.access_token)).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        bearer: Option<&str>,
    ) -> Result<Response, SessionError> {
        let url = format!("{}{}", self.config.base_url(), path);
        let mut req = self.http.request(method, &url);
        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(SessionError::Transport)
    }

    /// GET with credentials.
    pub async fn get(&self, path: &str) -> Result<Response, SessionError> {
        self.request(Method::GET, path, None, CallOptions::default()).await
    }

    /// POST a JSON body with credentials.
    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response, SessionError> {
        let body = serde_json::to_value(body).map_err(SessionError::Encode)?;
        self.request(Method::POST, path, Some(body), CallOptions::default()).await
    }

    /// PUT a JSON body with credentials.
    pub async fn put<T: Serialize>(&self, path: &str, body: &T) -> Result<Response, SessionError> {
        let body = serde_json::to_value(body).map_err(SessionError::Encode)?;
        self.request(Method::PUT, path, Some(body), CallOptions::default()).await
    }

    /// DELETE with credentials.
    pub async fn delete(&self, path: &str) -> Result<Response, SessionError> {
        self.request(Method::DELETE, path, None, CallOptions::default()).await
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
