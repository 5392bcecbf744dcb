use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging subscriber.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "conclave_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Parse a directive list such as `info,conclave_engine=debug`.
    /// Pieces that do not parse are skipped.
    pub fn from_directives(directives: &str, json: bool) -> Self {
        let mut config = Self {
            json,
            ..Self::default()
        };
        for piece in directives.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match piece.split_once('=') {
                Some((module, level)) => {
                    if let Ok(level) = Level::from_str(level.trim()) {
                        config.module_levels.push((module.trim().to_string(), level));
                    }
                }
                None => {
                    if let Ok(level) = Level::from_str(piece) {
                        config.log_level = level;
                    }
                }
            }
        }
        config
    }

    pub fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Returned by [`init_telemetry`]; records whether this call installed the
/// global subscriber.
#[derive(Debug)]
pub struct TelemetryGuard {
    installed: bool,
    filter: String,
}

impl TelemetryGuard {
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// The filter in effect when the subscriber was built.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

/// Install the global subscriber, writing to stderr. A second call leaves
/// the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.filter_directive());
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok();

    TelemetryGuard { installed, filter }
}
