// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable holder for the credential pair and cached user profile.
//!
//! A dumb key/value store: no validation happens here. With a path the
//! session survives restarts via an atomically written JSON file; without
//! one the store is memory-only.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The access/refresh tuple, treated as one unit everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Cached user-facing identity. Display only, never consulted for
/// authorization decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// On-disk session document. Key casing mirrors the wire format.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<Profile>,
}

/// The single source of truth for "is there a session".
pub struct CredentialStore {
    state: RwLock<StoredSession>,
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Open a store, loading any previously persisted session.
    pub fn open(path: Option<PathBuf>) -> Self {
        let state = match path.as_deref() {
            Some(p) => load_session(p),
            None => StoredSession::default(),
        };
        Self { state: RwLock::new(state), path }
    }

    /// Store with no persistence.
    pub fn in_memory() -> Self {
        Self::open(None)
    }

    /// Persist a new credential pair. The cached profile is kept: it
    /// belongs to the session, not to an individual access token.
    pub fn save(&self, pair: CredentialPair) {
        let mut state = self.state.write();
        state.access_token = Some(pair.access_token);
        state.refresh_token = Some(pair.refresh_token);
        self.persist(&state);
    }

    /// Current pair, or `None` when either half is missing.
    pub fn load(&self) -> Option<CredentialPair> {
        let state = self.state.read();
        match (&state.access_token, &state.refresh_token) {
            (Some(access), Some(refresh)) => Some(CredentialPair {
                access_token: access.clone(),
                refresh_token: refresh.clone(),
            }),
            // A half-present pair reads as no session at all.
            _ => None,
        }
    }

    /// Cache the user profile.
    pub fn save_profile(&self, profile: Profile) {
        let mut state = self.state.write();
        state.user = Some(profile);
        self.persist(&state);
    }

    /// Cached profile, if any.
    pub fn profile(&self) -> Option<Profile> {
        self.state.read().user.clone()
    }

    /// Remove tokens and profile in one step. A concurrent reader sees
    /// either the full session or none of it. Idempotent.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = StoredSession::default();
        let Some(ref path) = self.path else { return };
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "session file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), "failed to remove session file: {e}"),
        }
    }

    /// Write the session to disk (tmp file + rename). IO failures are
    /// logged, not fatal: the in-memory session stays usable.
    fn persist(&self, state: &StoredSession) {
        let Some(ref path) = self.path else { return };

        let json = match serde_json::to_string_pretty(state) {
            Ok(j) => j,
            Err(e) => {
                warn!("failed to serialize session: {e}");
                return;
            }
        };

        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        // Unique temp filename (PID + counter) so concurrent saves never
        // interleave partial writes into the same temp file.
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp = path.with_file_name(tmp_name);

        if let Err(e) = std::fs::write(&tmp, &json) {
            warn!(path = %tmp.display(), "failed to write session file: {e}");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            warn!(path = %path.display(), "failed to rename session file: {e}");
            return;
        }
        debug!(path = %path.display(), "session persisted");
    }
}

/// Read a persisted session, starting empty on a missing or unreadable file.
fn load_session(path: &Path) -> StoredSession {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) => {
            debug!(path = %path.display(), "no persisted session: {e}");
            return StoredSession::default();
        }
    };
    match serde_json::from_str(&data) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), "failed to parse persisted session: {e}");
            StoredSession::default()
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
