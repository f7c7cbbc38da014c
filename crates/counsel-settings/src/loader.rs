//! Settings loading.
//!
//! Loading flow:
//! 1. Start with compiled [`CounselSettings::default()`]
//! 2. Merge the JSON settings file if it exists
//! 3. Merge `COUNSEL_*` environment variables (highest priority)
//! 4. Validate ranges

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CounselSettings;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "COUNSEL_";

/// Resolve the default settings file (`~/.counsel/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".counsel").join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<CounselSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides. A missing file is fine.
pub fn load_settings_from_path(path: &Path) -> Result<CounselSettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    let settings: CounselSettings = Figment::from(Serialized::defaults(CounselSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &CounselSettings) -> Result<()> {
    if settings.database.pool_size == 0 {
        return Err(SettingsError::InvalidValue("database.pool_size must be > 0".into()));
    }
    if settings.bus.batch_size == 0 {
        return Err(SettingsError::InvalidValue("bus.batch_size must be > 0".into()));
    }
    if settings.bus.max_attempts == 0 {
        return Err(SettingsError::InvalidValue("bus.max_attempts must be > 0".into()));
    }
    if settings.server.send_buffer == 0 {
        return Err(SettingsError::InvalidValue("server.send_buffer must be > 0".into()));
    }
    Ok(())
}
