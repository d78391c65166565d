//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ShellSettings;

pub(crate) fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// `~/.browser-shell`.
pub fn settings_dir() -> PathBuf {
    home_dir().join(".browser-shell")
}

/// `~/.browser-shell/settings.json`.
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ShellSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed
/// [`ShellSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ShellSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file(path: &Path) -> Result<ShellSettings> {
    let defaults = serde_json::to_value(ShellSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SHELL_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut ShellSettings) {
    apply_env_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Invalid or out-of-range values are ignored with a warning.
pub fn apply_env_overrides_with<F>(settings: &mut ShellSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SHELL_ENGINE_PATH") {
        settings.engine.binary_path = Some(v);
    }
    if let Some(v) = env.string("SHELL_ENGINE_DIR") {
        settings.engine.install_dir = v;
    }
    if let Some(v) = env.string("SHELL_ENGINE_VERSION") {
        settings.engine.version = v;
    }
    if let Some(v) = env.string("SHELL_ENGINE_WORK_DIR") {
        settings.engine.work_dir = Some(v);
    }
    if let Some(v) = env.u64("SHELL_STARTUP_TIMEOUT_MS", 100, 600_000) {
        settings.engine.startup_timeout_ms = v;
    }
    if let Some(v) = env.u64("SHELL_WRITE_TIMEOUT_MS", 10, 600_000) {
        settings.engine.write_timeout_ms = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SHELL_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("SHELL_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("SHELL_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.usize("SHELL_MAX_CONNECTIONS", 1, 10_000) {
        settings.server.max_connections = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("SHELL_CLIENT_URL") {
        settings.client.url = v;
    }
    if let Some(v) = env.u64("SHELL_RECONNECT_BASE_MS", 10, 60_000) {
        settings.client.reconnect_base_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("SHELL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("SHELL_LOG_JSON") {
        settings.logging.format = if v {
            shell_core::logging::LogFormat::Json
        } else {
            shell_core::logging::LogFormat::Compact
        };
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
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

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
