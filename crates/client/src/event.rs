// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Events broadcast to the embedding application.
///
/// The subsystem never navigates by itself; when a session ends it emits
/// [`SessionEvent::SignInRequired`] and the UI routes the visitor to the
/// public entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new credential pair was obtained and persisted.
    TokensRefreshed,
    /// The session is gone; navigate to the sign-in entry point.
    SignInRequired(SignInReason),
}

/// Why sign-in navigation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInReason {
    /// No credentials were stored to begin with. Not an error.
    NoSession,
    /// An access token was rejected mid-call and renewal failed.
    SessionExpired,
    /// The service rejected the refresh token itself.
    RefreshRejected,
    /// A scheduled renewal failed and so did its retry.
    RenewalFailed,
    /// The session check for a protected view failed.
    ValidationFailed,
    /// The user signed out.
    LoggedOut,
}
