//! Connectivity monitoring configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Default seconds between interface rescans.
pub const DEFAULT_RESCAN_INTERVAL_SECS: u64 = 5;

/// Connectivity monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interval between interface rescans. Zero disables polling; state then
    /// only changes through explicit reports.
    pub rescan_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rescan_interval_secs: DEFAULT_RESCAN_INTERVAL_SECS,
        }
    }
}

impl NetworkConfig {
    pub fn rescan_interval(&self) -> Option<Duration> {
        (self.rescan_interval_secs > 0).then(|| Duration::from_secs(self.rescan_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescan_interval_default() {
        assert_eq!(NetworkConfig::default().rescan_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_rescan_interval_zero_disables() {
        let config = NetworkConfig { rescan_interval_secs: 0 };
        assert!(config.rescan_interval().is_none());
    }
}
