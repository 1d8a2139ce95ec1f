//! Resolver configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod discovery;
mod network;
mod probe;
mod settings;

pub use discovery::{DiscoveryConfig, DEFAULT_DOMAIN, DEFAULT_SERVICE_TYPE};
pub use network::{NetworkConfig, DEFAULT_RESCAN_INTERVAL_SECS};
pub use probe::{ProbeConfig, DEFAULT_HEALTH_PATH, DEFAULT_PROBE_TIMEOUT_MS};
pub use settings::{SettingsConfig, DEFAULT_SETTINGS_FILE};

use serde::Deserialize;
use url::Url;

use crate::discovery::candidate::is_loopback_url;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "falconeye.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FALCONEYE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FALCONEYE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FALCONEYE_LOG";

/// Public relay (tunnel) address, always available.
pub const DEFAULT_CLOUD_RELAY_URL: &str = "https://cam.falconeye.website";

/// Local addresses tried when discovery finds nothing.
pub const DEFAULT_STATIC_FALLBACKS: &[&str] = &["http://192.168.31.233:3000", "http://10.34.63.233:3000"];

/// Error types for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid cloud relay URL '{url}': {message}")]
    InvalidCloudRelay { url: String, message: String },
}

/// Main resolver configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fixed public relay base URL used when nothing local answers.
    pub cloud_relay_url: String,
    /// Static local fallbacks, tried after discovered candidates.
    pub static_fallbacks: Vec<String>,
    /// Service discovery configuration.
    pub discovery: DiscoveryConfig,
    /// Health probe configuration.
    pub probe: ProbeConfig,
    /// Connectivity monitoring configuration.
    pub network: NetworkConfig,
    /// Durable per-device settings (manual override).
    pub settings: SettingsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloud_relay_url: DEFAULT_CLOUD_RELAY_URL.to_string(),
            static_fallbacks: DEFAULT_STATIC_FALLBACKS.iter().map(|s| s.to_string()).collect(),
            discovery: DiscoveryConfig::default(),
            probe: ProbeConfig::default(),
            network: NetworkConfig::default(),
            settings: SettingsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `falconeye.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("static_fallbacks")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed cloud relay URL.
    ///
    /// The relay must be an absolute http(s) URL with a host and must not be
    /// loopback; the loopback guard substitutes it, so it cannot itself be
    /// loopback.
    pub fn cloud_relay(&self) -> Result<Url, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidCloudRelay {
            url: self.cloud_relay_url.clone(),
            message: message.to_string(),
        };

        let url = Url::parse(self.cloud_relay_url.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        if is_loopback_url(&url) {
            return Err(invalid("relay must not be a loopback address"));
        }
        Ok(url)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cloud_relay().map(|_| ())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
