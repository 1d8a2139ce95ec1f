//! Discovery configuration types.

use std::time::Duration;

use serde::Deserialize;

/// DNS-SD service type advertised by the FalconEye backend.
pub const DEFAULT_SERVICE_TYPE: &str = "_falconeye._tcp";
/// DNS-SD browse domain.
pub const DEFAULT_DOMAIN: &str = "local";

/// Service discovery configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Browse for advertised backends while the network is reachable.
    pub enabled: bool,
    /// Service type without domain, e.g. `_falconeye._tcp`.
    pub service_type: String,
    /// Browse domain, e.g. `local`.
    pub domain: String,
    /// Per-address connect timeout when resolving an advertisement.
    pub resolve_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            resolve_timeout_ms: 1000,
        }
    }
}

impl DiscoveryConfig {
    /// Fully qualified type as mDNS expects it: `_falconeye._tcp.local.`
    pub fn fully_qualified_type(&self) -> String {
        let service_type = self.service_type.trim_end_matches('.');
        let domain = self.domain.trim_matches('.');
        format!("{service_type}.{domain}.")
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}
