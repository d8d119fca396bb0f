// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the function gateway.
//!
//! This crate provides [`GatewayConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files, applying environment
//! variable overrides, merging overlays, and producing advisory
//! [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent startup but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A timeout is unusually large.
    LargeTimeout {
        /// Name of the timeout field.
        field: String,
        /// Timeout value in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeTimeout { field, secs } => {
                write!(f, "'{field}' has an unusually large timeout ({secs}s)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the function gateway.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Address to bind the HTTP listener to, e.g. `"0.0.0.0:8787"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,

    /// Log level (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Extra public paths (beyond the static `/` and `/health` defaults),
    /// supporting a trailing `*` wildcard.
    #[serde(default)]
    pub public_endpoints: Vec<String>,

    /// Composite rate-limiter window/threshold settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Wall-clock deadline for a single sandbox dispatch, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_timeout_secs: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            log_level: Some("info".into()),
            public_endpoints: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            sandbox_timeout_secs: Some(DEFAULT_SANDBOX_TIMEOUT_SECS),
        }
    }
}

/// Per-dimension window/threshold settings for the composite rate limiter.
///
/// See `fg-ratelimit` for the atomic check-and-consume implementation this
/// configures.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// `ip` dimension window length, in milliseconds.
    pub ip_window_ms: u64,
    /// `ip` dimension request budget per window.
    pub ip_max: u32,
    /// `function` dimension window length, in milliseconds.
    pub fn_window_ms: u64,
    /// `function` dimension request budget per window.
    pub fn_max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_window_ms: 60_000,
            ip_max: 120,
            fn_window_ms: 60_000,
            fn_max: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default sandbox dispatch deadline (§5: "suggested default 30 s").
pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 30;

/// Maximum allowed timeout in seconds (24 hours).
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Threshold above which a timeout generates a warning.
const LARGE_TIMEOUT_THRESHOLD: u64 = 3_600;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`GatewayConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`GatewayConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => GatewayConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`GatewayConfig`].
pub fn parse_toml(content: &str) -> Result<GatewayConfig, ConfigError> {
    toml::from_str::<GatewayConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `PUBLIC_ENDPOINTS` (comma-separated, replaces the configured list)
/// - `RATE_LIMIT_IP_WINDOW_MS`, `RATE_LIMIT_IP_MAX`
/// - `RATE_LIMIT_FN_WINDOW_MS`, `RATE_LIMIT_FN_MAX`
/// - `GATEWAY_BIND_ADDR`
/// - `GATEWAY_LOG_LEVEL`
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Ok(val) = std::env::var("PUBLIC_ENDPOINTS") {
        config.public_endpoints = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = parse_env_u64("RATE_LIMIT_IP_WINDOW_MS") {
        config.rate_limit.ip_window_ms = v;
    }
    if let Some(v) = parse_env_u32("RATE_LIMIT_IP_MAX") {
        config.rate_limit.ip_max = v;
    }
    if let Some(v) = parse_env_u64("RATE_LIMIT_FN_WINDOW_MS") {
        config.rate_limit.fn_window_ms = v;
    }
    if let Some(v) = parse_env_u32("RATE_LIMIT_FN_MAX") {
        config.rate_limit.fn_max = v;
    }
    if let Ok(val) = std::env::var("GATEWAY_BIND_ADDR") {
        config.bind_addr = Some(val);
    }
    if let Ok(val) = std::env::var("GATEWAY_LOG_LEVEL") {
        config.log_level = Some(val);
    }
}

fn parse_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (invalid log level, zero/out-of-range windows or timeouts)
/// are returned as a [`ConfigError::ValidationError`]; soft issues come back
/// as warnings.
pub fn validate_config(config: &GatewayConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    let rl = &config.rate_limit;
    if rl.ip_window_ms == 0 {
        errors.push("rate_limit.ip_window_ms must be greater than zero".into());
    }
    if rl.ip_max == 0 {
        errors.push("rate_limit.ip_max must be greater than zero".into());
    }
    if rl.fn_window_ms == 0 {
        errors.push("rate_limit.fn_window_ms must be greater than zero".into());
    }
    if rl.fn_max == 0 {
        errors.push("rate_limit.fn_max must be greater than zero".into());
    }

    if let Some(secs) = config.sandbox_timeout_secs {
        if secs == 0 || secs > MAX_TIMEOUT_SECS {
            errors.push(format!(
                "sandbox_timeout_secs {secs} out of range (1..{MAX_TIMEOUT_SECS})"
            ));
        } else if secs > LARGE_TIMEOUT_THRESHOLD {
            warnings.push(ConfigWarning::LargeTimeout {
                field: "sandbox_timeout_secs".into(),
                secs,
            });
        }
    }

    if config.bind_addr.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "bind_addr".into(),
            hint: "callers must always specify a bind address explicitly".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over `base`.
///
/// `public_endpoints` is replaced wholesale by a non-empty overlay list
/// rather than concatenated, matching the env-override semantics above.
pub fn merge_configs(base: GatewayConfig, overlay: GatewayConfig) -> GatewayConfig {
    GatewayConfig {
        bind_addr: overlay.bind_addr.or(base.bind_addr),
        log_level: overlay.log_level.or(base.log_level),
        public_endpoints: if overlay.public_endpoints.is_empty() {
            base.public_endpoints
        } else {
            overlay.public_endpoints
        },
        rate_limit: overlay.rate_limit,
        sandbox_timeout_secs: overlay.sandbox_timeout_secs.or(base.sandbox_timeout_secs),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
