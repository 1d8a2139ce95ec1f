//! Candidate addresses for reaching the backend.
//!
//! A candidate is an immutable `scheme://host:port` base address tagged with
//! where it came from. Candidates are compared by their normalized identity
//! string, so the same server seen twice collapses to one entry.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};
use url::{Host, Url};

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Found by local service discovery.
    Discovered,
    /// Hardcoded fallback from configuration.
    StaticFallback,
    /// Operator-supplied override.
    ManualOverride,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Discovered => write!(f, "discovered"),
            Origin::StaticFallback => write!(f, "static-fallback"),
            Origin::ManualOverride => write!(f, "manual-override"),
        }
    }
}

/// URL scheme of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Error types for candidate parsing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CandidateError {
    #[error("Not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported scheme '{scheme}' in {url}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// An address usable to reach the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    scheme: Scheme,
    host: String,
    port: u16,
    origin: Origin,
    discovered_at: Option<DateTime<Utc>>,
}

impl Candidate {
    /// Parse a base URL string into a candidate.
    ///
    /// Only `http` and `https` are accepted. Path, query and fragment are
    /// dropped; the port defaults to the scheme's well-known port.
    pub fn parse(input: &str, origin: Origin) -> Result<Self, CandidateError> {
        let trimmed = input.trim();
        let url = Url::parse(trimmed).map_err(|_| CandidateError::InvalidUrl(trimmed.to_string()))?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(CandidateError::UnsupportedScheme {
                    url: trimmed.to_string(),
                    scheme: other.to_string(),
                })
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_ascii_lowercase(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(CandidateError::MissingHost(trimmed.to_string())),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| CandidateError::InvalidUrl(trimmed.to_string()))?;

        Ok(Self {
            scheme,
            host,
            port,
            origin,
            discovered_at: None,
        })
    }

    /// Build a discovered candidate from a resolved socket address.
    ///
    /// Advertised instances are always reached over plain `http`.
    pub fn discovered(addr: SocketAddr, at: DateTime<Utc>) -> Self {
        Self {
            scheme: Scheme::Http,
            host: addr.ip().to_string(),
            port: addr.port(),
            origin: Origin::Discovered,
            discovered_at: Some(at),
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn discovered_at(&self) -> Option<DateTime<Utc>> {
        self.discovered_at
    }

    /// Normalized `scheme://host:port` identity.
    pub fn identity(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.url_host(), self.port)
    }

    /// Base URL for requests against this candidate.
    pub fn base_url(&self) -> Result<Url, CandidateError> {
        let identity = self.identity();
        Url::parse(&identity).map_err(|_| CandidateError::InvalidUrl(identity))
    }

    /// Whether the host refers to the local machine.
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.host)
    }

    fn url_host(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{}]", ip),
            _ => self.host.clone(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity(), self.origin)
    }
}

/// Loopback check used by the publish guard.
///
/// Matches `localhost` (and `*.localhost`) plus any loopback IP literal,
/// bracketed or not.
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Loopback check for a full URL.
pub fn is_loopback_url(url: &Url) -> bool {
    url.host_str().map(is_loopback_host).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV6};

    #[test]
    fn test_parse_http_with_port() {
        let c = Candidate::parse("http://192.168.1.50:3000", Origin::StaticFallback).unwrap();
        assert_eq!(c.scheme(), Scheme::Http);
        assert_eq!(c.host(), "192.168.1.50");
        assert_eq!(c.port(), 3000);
        assert_eq!(c.origin(), Origin::StaticFallback);
        assert!(c.discovered_at().is_none());
    }

    #[test]
    fn test_parse_defaults_port_from_scheme() {
        let c = Candidate::parse("https://relay.example", Origin::ManualOverride).unwrap();
        assert_eq!(c.port(), 443);
        assert_eq!(c.identity(), "https://relay.example:443");
    }

    #[test]
    fn test_identity_normalizes_case_path_and_whitespace() {
        let a = Candidate::parse("  http://Camera.LOCAL:3000/system/ ", Origin::StaticFallback).unwrap();
        let b = Candidate::parse("http://camera.local:3000", Origin::ManualOverride).unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_parse_rejects_non_url() {
        let err = Candidate::parse("not-a-url", Origin::ManualOverride).unwrap_err();
        assert!(matches!(err, CandidateError::InvalidUrl(_)));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let err = Candidate::parse("ftp://10.0.0.9:21", Origin::StaticFallback).unwrap_err();
        assert!(matches!(err, CandidateError::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_discovered_candidate_uses_http() {
        let at = Utc::now();
        let addr = SocketAddr::from((Ipv4Addr::new(192, 168, 1, 50), 3000));
        let c = Candidate::discovered(addr, at);
        assert_eq!(c.identity(), "http://192.168.1.50:3000");
        assert_eq!(c.origin(), Origin::Discovered);
        assert_eq!(c.discovered_at(), Some(at));
    }

    #[test]
    fn test_ipv6_identity_is_bracketed() {
        let addr = SocketAddr::V6(SocketAddrV6::new(
            "fe80::1".parse::<Ipv6Addr>().unwrap(),
            3000,
            0,
            0,
        ));
        let c = Candidate::discovered(addr, Utc::now());
        assert_eq!(c.identity(), "http://[fe80::1]:3000");
        assert!(c.base_url().is_ok());
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("LOCALHOST"));
        assert!(is_loopback_host("api.localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("127.10.0.3"));
        assert!(is_loopback_host("[::1]"));
        assert!(!is_loopback_host("192.168.1.50"));
        assert!(!is_loopback_host("localhost-camera.lan"));
    }

    #[test]
    fn test_candidate_is_loopback() {
        let c = Candidate::parse("http://localhost:3000", Origin::ManualOverride).unwrap();
        assert!(c.is_loopback());
        let c = Candidate::parse("http://10.0.0.9:3000", Origin::StaticFallback).unwrap();
        assert!(!c.is_loopback());
    }
}
