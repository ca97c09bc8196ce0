//! # plaza-settings
//!
//! Layered configuration for the plaza room server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PlazaSettings::default()`]
//! 2. **Settings file**: `~/.plaza/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `PLAZA_*` overrides (highest priority)
//!
//! The binary applies its CLI flags on top of the loaded value. Settings are
//! passed explicitly; there is no process-wide settings singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with_report, settings_path, validate, warn_rejected, RejectedOverride,
};
pub use types::{LoggingSettings, PlazaSettings, ServerSettings};
