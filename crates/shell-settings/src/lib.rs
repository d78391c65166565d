//! # shell-settings
//!
//! Configuration for the browser shell control plane.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ShellSettings::default()`]
//! 2. **User file**: `~/.browser-shell/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SHELL_*` overrides (highest priority)
//!
//! There is no global instance: the binary loads settings once and hands the
//! relevant sections to each component it constructs.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_dir, settings_path};
pub use types::*;
