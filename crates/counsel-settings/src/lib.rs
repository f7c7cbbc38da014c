//! # counsel-settings
//!
//! Configuration with layered sources, in priority order:
//! 1. **Compiled defaults**: [`CounselSettings::default()`]
//! 2. **Settings file**: `~/.counsel/settings.json` or an explicit path
//! 3. **Environment variables**: `COUNSEL_*`, `__` separates sections
//!    (`COUNSEL_SERVER__PORT=9000`)
//!
//! Settings are loaded once by the process entry point and passed down
//! explicitly; there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::*;
