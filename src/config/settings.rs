//! Durable settings configuration types.

use std::path::PathBuf;

use serde::Deserialize;

/// File name used when no settings path is configured.
pub const DEFAULT_SETTINGS_FILE: &str = "falconeye-settings.json";

/// Durable settings configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Settings file path. Defaults to `DEFAULT_SETTINGS_FILE` in the
    /// working directory.
    pub path: Option<PathBuf>,
}

impl SettingsConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }
}
