//! Settings type definitions.
//!
//! Every type is camelCase on the wire and carries `#[serde(default)]`, so a
//! partial file only has to name the values it changes.

use serde::{Deserialize, Serialize};

/// Root settings for a conclave run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConclaveSettings {
    /// Model every session is created with.
    pub model: String,
    /// Turn limit per session exchange.
    pub max_turns: u32,
    /// Render each sealed turn as it happens.
    pub debug: bool,
    /// Directory whose templates override the built-in prompts.
    pub prompts_dir: String,
    pub runtime: RuntimeSettings,
    pub logging: LoggingSettings,
}

impl Default for ConclaveSettings {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5-20251001".to_string(),
            max_turns: 15,
            debug: false,
            prompts_dir: "prompts".to_string(),
            runtime: RuntimeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// The external agent program each session is run in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    pub command: String,
    pub args: Vec<String>,
    /// How long a closing session may take before it is killed.
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            command: "conclave-agent".to_string(),
            args: Vec::new(),
            shutdown_grace_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ConclaveSettings::default();
        assert_eq!(settings.model, "claude-haiku-4-5-20251001");
        assert_eq!(settings.max_turns, 15);
        assert!(!settings.debug);
        assert_eq!(settings.prompts_dir, "prompts");
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.runtime.shutdown_grace_ms, 5_000);
    }

    #[test]
    fn camel_case_on_the_wire() {
        let json = serde_json::to_value(ConclaveSettings::default()).unwrap();
        assert_eq!(json["maxTurns"], 15);
        assert_eq!(json["promptsDir"], "prompts");
        assert_eq!(json["runtime"]["shutdownGraceMs"], 5_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: ConclaveSettings =
            serde_json::from_str(r#"{"runtime": {"command": "agent"}}"#).unwrap();
        assert_eq!(settings.runtime.command, "agent");
        assert!(settings.runtime.args.is_empty());
        assert_eq!(settings.max_turns, 15);
    }
}
