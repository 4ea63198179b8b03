// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token renewal: the single-flight refresh exchange and the proactive
//! renewal scheduler.
//!
//! Two triggers can race: the scheduled renewal timer and a reactive 401
//! from a live call. The in-flight slot is claimed synchronously before any
//! network work, so whichever trigger loses the race backs off instead of
//! starting a second exchange.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::event::{SessionEvent, SignInReason};
use crate::expiry;
use crate::store::{CredentialPair, CredentialStore};

/// Result of one renewal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new pair was obtained and persisted.
    Refreshed,
    /// Another renewal already holds the in-flight slot; no call was made.
    AlreadyInFlight,
    /// No credential pair is stored; nothing to exchange.
    NoSession,
    /// The service rejected the refresh token. The session was cleared.
    Rejected,
    /// Transport or service error. The session is untouched and a later
    /// attempt may succeed.
    Failed,
}

impl RefreshOutcome {
    /// Whether the caller now holds a fresh, usable access token.
    pub fn succeeded(self) -> bool {
        matches!(self, Self::Refreshed)
    }
}

/// Body of a `/auth/refresh` exchange.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<RefreshedTokens>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedTokens {
    access_token: String,
    refresh_token: String,
}

/// Why a single exchange attempt failed.
enum ExchangeError {
    /// The refresh token itself is dead (401/403). Terminal.
    Rejected(StatusCode),
    /// Anything else: network error, unexpected status, malformed body.
    Transient(String),
}

/// Owns the renewal protocol: exchanges the refresh token for a new pair,
/// serializes concurrent attempts into one in-flight operation, and keeps at
/// most one proactive renewal timer armed ahead of expiry.
pub struct RefreshCoordinator {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    http: reqwest::Client,
    event_tx: broadcast::Sender<SessionEvent>,
    /// Single-flight slot. Claimed before the first await of a renewal and
    /// released by a drop guard, so an erroring exchange cannot wedge it.
    in_flight: AtomicBool,
    /// Wakes the scheduler loop to recompute its pending timer.
    rearm: Notify,
    /// Cancellation handle for the running scheduler loop, if any.
    scheduler: Mutex<Option<CancellationToken>>,
}

impl RefreshCoordinator {
    pub fn new(
        config: SessionConfig,
        store: Arc<CredentialStore>,
        http: reqwest::Client,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            event_tx,
            in_flight: AtomicBool::new(false),
            rearm: Notify::new(),
            scheduler: Mutex::new(None),
        }
    }

    /// Exchange the stored refresh token for a new credential pair.
    ///
    /// At most one exchange is ever in flight: a second caller arriving
    /// while one is pending gets [`RefreshOutcome::AlreadyInFlight`] back
    /// immediately, without a network call.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("renewal already in flight, backing off");
            return RefreshOutcome::AlreadyInFlight;
        }
        let _slot = InFlightSlot(&self.in_flight);

        let Some(pair) = self.store.load() else {
            debug!("no stored session to renew");
            return RefreshOutcome::NoSession;
        };

        match self.exchange(&pair.refresh_token).await {
            Ok(fresh) => {
                self.store.save(fresh);
                info!("session tokens renewed");
                let _ = self.event_tx.send(SessionEvent::TokensRefreshed);
                RefreshOutcome::Refreshed
            }
            Err(ExchangeError::Rejected(status)) => {
                error!(%status, "refresh token rejected, ending session");
                self.store.clear();
                let _ = self
                    .event_tx
                    .send(SessionEvent::SignInRequired(SignInReason::RefreshRejected));
                RefreshOutcome::Rejected
            }
            Err(ExchangeError::Transient(msg)) => {
                warn!("token renewal failed: {msg}");
                RefreshOutcome::Failed
            }
        }
    }

    /// Execute one refresh exchange against the service.
    async fn exchange(&self, refresh_token: &str) -> Result<CredentialPair, ExchangeError> {
        let url = format!("{}{}", self.config.base_url(), self.config.refresh_path);

        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(format!("transport: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ExchangeError::Rejected(status));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::Transient(format!("HTTP {status}: {body}")));
        }

        let body: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(format!("parse response: {e}")))?;

        match body.data {
            Some(tokens) if body.success => Ok(CredentialPair {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
            }),
            _ => Err(ExchangeError::Transient("refresh response missing token data".into())),
        }
    }

    /// Set up renewal at application start.
    ///
    /// Does nothing without a stored session. A token with more than the
    /// renewal margin remaining just gets a scheduled renewal; one at or
    /// inside the margin (it aged while the process was stopped, when no
    /// timer could fire) is renewed immediately, and the schedule starts
    /// only if that succeeds.
    pub async fn initialize(self: &Arc<Self>, shutdown: &CancellationToken) {
        let Some(pair) = self.store.load() else {
            debug!("no stored session, renewal not scheduled");
            return;
        };

        let remaining = expiry::millis_remaining_at(
            &pair.access_token,
            expiry::epoch_ms(),
            self.config.fallback_ttl_ms,
        );
        if remaining <= self.config.refresh_margin_ms {
            info!(remaining_ms = remaining, "stored token near expiry, renewing now");
            if !self.refresh().await.succeeded() {
                warn!("startup renewal failed, renewal not scheduled");
                return;
            }
        }

        self.start(shutdown);
    }

    /// Start (or restart) the scheduler loop.
    pub fn start(self: &Arc<Self>, shutdown: &CancellationToken) {
        let cancel = shutdown.child_token();
        if let Some(previous) = self.scheduler.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run(cancel).await;
        });
    }

    /// Stop the scheduler loop, dropping its pending timer.
    pub fn stop(&self) {
        if let Some(cancel) = self.scheduler.lock().take() {
            cancel.cancel();
        }
    }

    /// Replace the pending renewal timer with one recomputed from the
    /// current access token.
    pub fn schedule_next_refresh(&self) {
        self.rearm.notify_one();
    }

    /// Milliseconds until the next proactive renewal should fire: renew
    /// `refresh_margin_ms` ahead of claimed expiry, but never sooner than
    /// `min_schedule_ms` from now (clock skew would otherwise produce a
    /// tight renewal loop).
    fn schedule_delay_ms(&self, access_token: &str) -> u64 {
        let remaining = expiry::millis_remaining_at(
            access_token,
            expiry::epoch_ms(),
            self.config.fallback_ttl_ms,
        );
        remaining
            .saturating_sub(self.config.refresh_margin_ms)
            .max(self.config.min_schedule_ms)
    }

    /// Scheduler loop: arms one timer at a time, renews when it fires, and
    /// tolerates exactly one transient failure per cycle before giving up
    /// and ending the session.
    pub(crate) async fn run(self: Arc<Self>, cancel: CancellationToken) {
        debug!("renewal scheduler started");
        loop {
            let Some(pair) = self.store.load() else {
                debug!("session gone, renewal scheduler stopped");
                return;
            };
            let delay = self.schedule_delay_ms(&pair.access_token);
            debug!(delay_ms = delay, "next renewal armed");

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                _ = self.rearm.notified() => {
                    debug!("renewal timer replaced");
                    continue;
                }
                _ = cancel.cancelled() => {
                    debug!("renewal scheduler stopped");
                    return;
                }
            }

            match self.refresh().await {
                RefreshOutcome::Refreshed => continue,
                // Lost the race to a reactive renewal. Its outcome decides
                // the session; this loop only recomputes the timer.
                RefreshOutcome::AlreadyInFlight => continue,
                RefreshOutcome::Rejected | RefreshOutcome::NoSession => return,
                RefreshOutcome::Failed => {}
            }

            warn!(
                retry_in_ms = self.config.retry_delay_ms,
                "scheduled renewal failed, retrying once"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay()) => {}
                _ = cancel.cancelled() => return,
            }

            match self.refresh().await {
                RefreshOutcome::Refreshed | RefreshOutcome::AlreadyInFlight => continue,
                RefreshOutcome::Rejected | RefreshOutcome::NoSession => return,
                RefreshOutcome::Failed => {
                    error!("renewal retry failed, ending session");
                    self.store.clear();
                    let _ = self
                        .event_tx
                        .send(SessionEvent::SignInRequired(SignInReason::RenewalFailed));
                    return;
                }
            }
        }
    }
}

/// Releases the single-flight slot on every exit path.
struct InFlightSlot<'a>(&'a AtomicBool);

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
