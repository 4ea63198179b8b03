// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session client configuration.
///
/// Only `api_url` is required; everything else defaults to the production
/// renewal policy. Loadable from JSON/TOML via serde or built in code with
/// [`SessionConfig::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the commerce API (e.g. `https://api.shopfront.dev`).
    pub api_url: String,

    /// Path of the token renewal endpoint.
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Path of the session validation ("who am I") endpoint.
    #[serde(default = "default_profile_path")]
    pub profile_path: String,

    /// Path of the sign-out endpoint.
    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    /// File the session is persisted to. Memory-only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,

    /// Milliseconds before claimed expiry to renew the access token.
    #[serde(default = "default_refresh_margin_ms")]
    pub refresh_margin_ms: u64,

    /// Never arm a renewal timer closer than this many milliseconds.
    #[serde(default = "default_min_schedule_ms")]
    pub min_schedule_ms: u64,

    /// Delay before the single retry of a failed scheduled renewal.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Assumed remaining lifetime for tokens without a readable expiry.
    #[serde(default = "default_fallback_ttl_ms")]
    pub fallback_ttl_ms: u64,

    /// Timeout for individual API requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_owned()
}

fn default_profile_path() -> String {
    "/auth/profile".to_owned()
}

fn default_logout_path() -> String {
    "/auth/logout".to_owned()
}

fn default_refresh_margin_ms() -> u64 {
    120_000
}

fn default_min_schedule_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_fallback_ttl_ms() -> u64 {
    900_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl SessionConfig {
    /// Config for the given API base URL with the default renewal policy.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            refresh_path: default_refresh_path(),
            profile_path: default_profile_path(),
            logout_path: default_logout_path(),
            persist_path: None,
            refresh_margin_ms: default_refresh_margin_ms(),
            min_schedule_ms: default_min_schedule_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            fallback_ttl_ms: default_fallback_ttl_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Reject configs that cannot work, before anything is built on them.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("api_url must be an http(s) URL: {:?}", self.api_url);
        }

        for (name, path) in [
            ("refresh_path", &self.refresh_path),
            ("profile_path", &self.profile_path),
            ("logout_path", &self.logout_path),
        ] {
            if !path.starts_with('/') {
                anyhow::bail!("{name} must start with '/': {path:?}");
            }
        }

        if self.refresh_margin_ms == 0 {
            anyhow::bail!("refresh_margin_ms must be positive");
        }
        if self.min_schedule_ms == 0 {
            anyhow::bail!("min_schedule_ms must be positive");
        }

        Ok(())
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
