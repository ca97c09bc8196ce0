//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PlazaSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PLAZA_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use plaza_core::logging::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::PlazaSettings;

/// Resolve the default settings file path (`~/.plaza/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".plaza").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PlazaSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value
/// is an error. Rejected env overrides are logged at warn through the
/// current subscriber; use [`load_settings_with_report`] to log them later.
pub fn load_settings_from_path(path: &Path) -> Result<PlazaSettings> {
    let (settings, rejected) = load_settings_with_report(path)?;
    warn_rejected(&rejected);
    Ok(settings)
}

/// Like [`load_settings_from_path`], but hands back the rejected env
/// overrides instead of logging them.
///
/// Settings are usually loaded before the log subscriber exists, so the
/// caller reports these once logging is up.
pub fn load_settings_with_report(path: &Path) -> Result<(PlazaSettings, Vec<RejectedOverride>)> {
    let defaults = serde_json::to_value(PlazaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PlazaSettings = serde_json::from_value(merged)?;
    let rejected = apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok((settings, rejected))
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PLAZA_*` environment variable overrides from the process environment.
pub fn apply_env_overrides(settings: &mut PlazaSettings) -> Vec<RejectedOverride> {
    apply_overrides_from(settings, |name| std::env::var(name).ok())
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules; invalid values are ignored so the
/// file/default value stays in effect, and returned as [`RejectedOverride`]s.
pub fn apply_overrides_from(
    settings: &mut PlazaSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<RejectedOverride> {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let mut rejected = Vec::new();
    let mut reject = |key: &'static str, value: String| rejected.push(RejectedOverride { key, value });

    if let Some(v) = read("PLAZA_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("PLAZA_PORT") {
        match parse_u16_range(&v, 1, 65535) {
            Some(port) => settings.server.port = port,
            None => reject("PLAZA_PORT", v),
        }
    }
    if let Some(v) = read("PLAZA_ALLOWED_ORIGINS") {
        settings.server.allowed_origins = parse_list(&v);
    }
    if let Some(v) = read("PLAZA_SEND_QUEUE") {
        match parse_usize_range(&v, 1, 65_536) {
            Some(n) => settings.server.send_queue_capacity = n,
            None => reject("PLAZA_SEND_QUEUE", v),
        }
    }
    if let Some(v) = read("PLAZA_MAX_MESSAGE_SIZE") {
        match parse_usize_range(&v, 1, 16 * 1024 * 1024) {
            Some(n) => settings.server.max_message_size = n,
            None => reject("PLAZA_MAX_MESSAGE_SIZE", v),
        }
    }
    if let Some(v) = read("PLAZA_HEARTBEAT_INTERVAL_SECS") {
        match parse_u64_range(&v, 1, 3600) {
            Some(n) => settings.server.heartbeat_interval_secs = n,
            None => reject("PLAZA_HEARTBEAT_INTERVAL_SECS", v),
        }
    }
    if let Some(v) = read("PLAZA_HEARTBEAT_TIMEOUT_SECS") {
        match parse_u64_range(&v, 1, 86_400) {
            Some(n) => settings.server.heartbeat_timeout_secs = n,
            None => reject("PLAZA_HEARTBEAT_TIMEOUT_SECS", v),
        }
    }
    if let Some(v) = read("PLAZA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("PLAZA_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(_) => reject("PLAZA_LOG_FORMAT", v),
        }
    }
    rejected
}

/// Reject combinations the server cannot run with.
pub fn validate(settings: &PlazaSettings) -> Result<()> {
    let server = &settings.server;
    if server.send_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "sendQueueCapacity must be at least 1".into(),
        ));
    }
    if server.max_message_size == 0 {
        return Err(SettingsError::InvalidValue(
            "maxMessageSize must be at least 1".into(),
        ));
    }
    if server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "heartbeatIntervalSecs must be at least 1".into(),
        ));
    }
    if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(format!(
            "heartbeatTimeoutSecs ({}) is shorter than heartbeatIntervalSecs ({})",
            server.heartbeat_timeout_secs, server.heartbeat_interval_secs
        )));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// An env override whose value failed to parse and was ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedOverride {
    /// Variable name, e.g. `PLAZA_PORT`.
    pub key: &'static str,
    /// The raw value that was rejected.
    pub value: String,
}

/// Log each rejected override at warn.
pub fn warn_rejected(rejected: &[RejectedOverride]) {
    for r in rejected {
        tracing::warn!(key = r.key, value = %r.value, "invalid env override, ignoring");
    }
}
