//! Backend discovery.
//!
//! Provides the candidate model and the sources that feed it:
//! - DNS-SD browsing of `_falconeye._tcp` on the local link
//! - Static fallbacks from configuration
//! - An operator-supplied manual override

pub mod browser;
pub mod candidate;
pub mod registry;
pub mod service;
pub mod static_config;

pub use browser::{
    Advertisement, BrowseEvent, InstanceResolver, MdnsBrowser, ServiceBrowser, TcpResolver,
};
pub use candidate::{is_loopback_host, is_loopback_url, Candidate, CandidateError, Origin, Scheme};
pub use registry::{CandidateRegistry, CandidateSet, RegistrySnapshot};
pub use service::{ServiceDiscovery, UpdateCallback};
pub use static_config::{parse_fallbacks, parse_override};

/// Error types for service discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to start mDNS daemon: {0}")]
    Daemon(String),

    #[error("Failed to browse {service_type}: {message}")]
    Browse {
        service_type: String,
        message: String,
    },
}
