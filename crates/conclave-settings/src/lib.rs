//! # conclave-settings
//!
//! Settings are layered, lowest priority first:
//! 1. compiled defaults ([`ConclaveSettings::default()`])
//! 2. `~/.conclave/settings.json`, deep-merged over the defaults
//! 3. `CONCLAVE_*` environment variables
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{ConclaveSettings, LoggingSettings, RuntimeSettings};
