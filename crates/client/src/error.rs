// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the authenticated request gateway.
#[derive(Debug)]
pub enum SessionError {
    /// No credential pair is stored; the caller must sign in first.
    NoSession,
    /// The access token was rejected mid-call and renewal could not
    /// recover it. The local session has been cleared.
    SessionExpired,
    /// The request body could not be serialized.
    Encode(serde_json::Error),
    /// The HTTP request itself failed.
    Transport(reqwest::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => f.write_str("no active session"),
            Self::SessionExpired => f.write_str("session expired"),
            Self::Encode(e) => write!(f, "encode request body: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoSession | Self::SessionExpired => None,
            Self::Encode(e) => Some(e),
            Self::Transport(e) => Some(e),
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
