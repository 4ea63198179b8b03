// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn defaults_match_production_policy() {
    let config = SessionConfig::new("https://api.shopfront.dev");
    assert_eq!(config.refresh_path, "/auth/refresh");
    assert_eq!(config.profile_path, "/auth/profile");
    assert_eq!(config.logout_path, "/auth/logout");
    assert_eq!(config.refresh_margin_ms, 120_000);
    assert_eq!(config.min_schedule_ms, 5_000);
    assert_eq!(config.retry_delay_ms, 5_000);
    assert_eq!(config.fallback_ttl_ms, 900_000);
    assert_eq!(config.request_timeout_secs, 30);
    assert!(config.persist_path.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn base_url_trims_trailing_slash() {
    let config = SessionConfig::new("https://api.shopfront.dev/");
    assert_eq!(config.base_url(), "https://api.shopfront.dev");

    let config = SessionConfig::new("https://api.shopfront.dev");
    assert_eq!(config.base_url(), "https://api.shopfront.dev");
}

#[test]
fn validate_rejects_non_http_url() {
    let config = SessionConfig::new("ftp://api.shopfront.dev");
    assert!(config.validate().is_err());

    let config = SessionConfig::new("");
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_relative_paths() {
    let mut config = SessionConfig::new("https://api.shopfront.dev");
    config.profile_path = "auth/profile".to_owned();
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_zero_margin_and_floor() {
    let mut config = SessionConfig::new("https://api.shopfront.dev");
    config.refresh_margin_ms = 0;
    assert!(config.validate().is_err());

    let mut config = SessionConfig::new("https://api.shopfront.dev");
    config.min_schedule_ms = 0;
    assert!(config.validate().is_err());
}

#[test]
fn deserializes_with_defaults() -> anyhow::Result<()> {
    let config: SessionConfig =
        serde_json::from_str(r#"{ "api_url": "https://api.shopfront.dev" }"#)?;
    assert_eq!(config.refresh_margin_ms, 120_000);
    assert_eq!(config.refresh_path, "/auth/refresh");
    assert!(config.validate().is_ok());
    Ok(())
}

#[test]
fn deserializes_overrides() -> anyhow::Result<()> {
    let config: SessionConfig = serde_json::from_str(
        r#"{
            "api_url": "https://api.shopfront.dev",
            "refresh_margin_ms": 60000,
            "fallback_ttl_ms": 300000
        }"#,
    )?;
    assert_eq!(config.refresh_margin_ms, 60_000);
    assert_eq!(config.fallback_ttl_ms, 300_000);
    Ok(())
}
