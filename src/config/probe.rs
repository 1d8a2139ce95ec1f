//! Health probe configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Per-candidate health check timeout.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1200;
/// Health endpoint path, relative to a candidate base URL.
pub const DEFAULT_HEALTH_PATH: &str = "/system/status";

/// Health probe configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-candidate request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Health endpoint path.
    pub health_path: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
