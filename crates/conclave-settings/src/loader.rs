//! Settings loading with deep merge and environment overrides.
//!
//! 1. Start with compiled [`ConclaveSettings::default()`]
//! 2. If `~/.conclave/settings.json` exists, deep-merge it over the defaults
//! 3. Apply `CONCLAVE_*` environment overrides

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ConclaveSettings;

const MAX_TURNS_RANGE: (u32, u32) = (1, 1000);

/// `~/.conclave/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".conclave").join("settings.json")
}

pub fn load_settings() -> Result<ConclaveSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with environment overrides applied.
///
/// A missing file yields the defaults; unparseable JSON or an out-of-range
/// value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConclaveSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file(path: &Path) -> Result<ConclaveSettings> {
    let defaults = serde_json::to_value(ConclaveSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    let settings: ConclaveSettings = serde_json::from_value(merged)?;
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &ConclaveSettings) -> Result<()> {
    let (min, max) = MAX_TURNS_RANGE;
    if !(min..=max).contains(&settings.max_turns) {
        return Err(SettingsError::InvalidValue(format!(
            "maxTurns must be between {min} and {max}, got {}",
            settings.max_turns
        )));
    }
    if settings.runtime.command.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "runtime.command must not be empty".into(),
        ));
    }
    Ok(())
}

/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` leave `target` untouched.
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

pub fn apply_env_overrides(settings: &mut ConclaveSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Overrides read through `lookup`. Invalid values are ignored with a warning.
pub fn apply_overrides(settings: &mut ConclaveSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = string("CONCLAVE_MODEL") {
        settings.model = v;
    }
    if let Some(v) = string("CONCLAVE_MAX_TURNS") {
        let (min, max) = MAX_TURNS_RANGE;
        match parse_u32_range(&v, min, max) {
            Some(n) => settings.max_turns = n,
            None => warn!(key = "CONCLAVE_MAX_TURNS", value = %v, "invalid integer env var, ignoring"),
        }
    }
    if let Some(v) = string("CONCLAVE_DEBUG") {
        match parse_bool(&v) {
            Some(b) => settings.debug = b,
            None => warn!(key = "CONCLAVE_DEBUG", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = string("CONCLAVE_PROMPTS_DIR") {
        settings.prompts_dir = v;
    }
    if let Some(v) = string("CONCLAVE_RUNTIME_COMMAND") {
        settings.runtime.command = v;
    }
    if let Some(v) = string("CONCLAVE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let merged = deep_merge(
            json!({"runtime": {"command": "a", "args": ["x"]}, "debug": false}),
            json!({"runtime": {"command": "b"}}),
        );
        assert_eq!(merged["runtime"]["command"], "b");
        assert_eq!(merged["runtime"]["args"], json!(["x"]));
        assert_eq!(merged["debug"], false);
    }

    #[test]
    fn merge_arrays_replace_and_nulls_skip() {
        let merged = deep_merge(
            json!({"args": [1, 2, 3], "model": "m"}),
            json!({"args": [4], "model": null}),
        );
        assert_eq!(merged["args"], json!([4]));
        assert_eq!(merged["model"], "m");
    }

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, ConclaveSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"maxTurns": 30, "runtime": {"args": ["--stdio"]}, "logging": {"json": true}}"#,
        )
        .unwrap();

        let settings = load_file(&path).unwrap();
        assert_eq!(settings.max_turns, 30);
        assert_eq!(settings.runtime.args, ["--stdio"]);
        assert_eq!(settings.runtime.command, "conclave-agent");
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn zero_max_turns_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"maxTurns": 0}"#).unwrap();
        assert!(matches!(load_file(&path), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = ConclaveSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("CONCLAVE_MODEL", "claude-sonnet-4-5"),
                ("CONCLAVE_MAX_TURNS", "40"),
                ("CONCLAVE_DEBUG", "yes"),
                ("CONCLAVE_RUNTIME_COMMAND", "/usr/local/bin/agent"),
                ("CONCLAVE_LOG_LEVEL", "conclave_engine=debug"),
            ]),
        );
        assert_eq!(settings.model, "claude-sonnet-4-5");
        assert_eq!(settings.max_turns, 40);
        assert!(settings.debug);
        assert_eq!(settings.runtime.command, "/usr/local/bin/agent");
        assert_eq!(settings.logging.level, "conclave_engine=debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = ConclaveSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("CONCLAVE_MAX_TURNS", "5000"),
                ("CONCLAVE_DEBUG", "maybe"),
                ("CONCLAVE_MODEL", "  "),
            ]),
        );
        assert_eq!(settings, ConclaveSettings::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_u32_range("1", 1, 1000), Some(1));
        assert_eq!(parse_u32_range("0", 1, 1000), None);
        assert_eq!(parse_u32_range("abc", 1, 1000), None);
    }
}
