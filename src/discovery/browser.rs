//! DNS-SD browsing and per-instance resolution.
//!
//! [`ServiceBrowser`] turns a service-type browse into a stream of
//! [`BrowseEvent`]s; [`InstanceResolver`] turns one advertisement into a
//! concrete socket address by opening a short-lived TCP connection.
//! The production implementations are [`MdnsBrowser`] and [`TcpResolver`].

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::DiscoveryError;

/// How long the blocking mDNS reader waits before checking for shutdown.
const MDNS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One advertised backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Full DNS-SD instance name (`FalconEye @ host._falconeye._tcp.local.`).
    pub instance: String,
    /// Advertised target hostname.
    pub hostname: String,
    /// Addresses attached to the advertisement.
    pub addresses: Vec<IpAddr>,
    /// Advertised TCP port.
    pub port: u16,
}

/// Browse session events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// An instance was advertised (or re-advertised).
    Resolved(Advertisement),
    /// An instance withdrew its advertisement.
    Removed { instance: String },
}

/// Source of browse events for a service type.
pub trait ServiceBrowser: Send + Sync {
    /// Start browsing. Events arrive on the returned channel until
    /// [`stop_browse`](Self::stop_browse) is called.
    fn browse(&self, service_type: &str) -> Result<mpsc::UnboundedReceiver<BrowseEvent>, DiscoveryError>;

    /// Stop a browse started with [`browse`](Self::browse).
    fn stop_browse(&self, service_type: &str);
}

/// Resolves an advertisement to the address that actually answered.
#[async_trait]
pub trait InstanceResolver: Send + Sync {
    /// Returns `None` when no advertised address accepts a connection.
    async fn resolve(&self, advertisement: &Advertisement) -> Option<SocketAddr>;
}

// ============================================================================
// mDNS
// ============================================================================

/// Multicast DNS browser backed by `mdns-sd`.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl MdnsBrowser {
    /// Create the mDNS daemon.
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Daemon(e.to_string()))?;
        Ok(Self { daemon })
    }

    fn translate(event: ServiceEvent) -> Option<BrowseEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
                // Prefer IPv4; link-local IPv6 needs a scope the URL cannot carry.
                addresses.sort_by_key(|ip| (ip.is_ipv6(), *ip));
                Some(BrowseEvent::Resolved(Advertisement {
                    instance: info.get_fullname().to_string(),
                    hostname: info.get_hostname().to_string(),
                    addresses,
                    port: info.get_port(),
                }))
            }
            ServiceEvent::ServiceRemoved(_, instance) => Some(BrowseEvent::Removed { instance }),
            other => {
                debug!(event = ?other, "mDNS event");
                None
            }
        }
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn browse(&self, service_type: &str) -> Result<mpsc::UnboundedReceiver<BrowseEvent>, DiscoveryError> {
        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::Browse {
                service_type: service_type.to_string(),
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let service_type = service_type.to_string();

        // The mdns-sd receiver is synchronous; drain it off the async runtime.
        tokio::task::spawn_blocking(move || {
            info!(service_type = %service_type, "mDNS browse started");
            loop {
                if tx.is_closed() {
                    break;
                }
                match receiver.recv_timeout(MDNS_POLL_INTERVAL) {
                    Ok(event) => {
                        if let Some(event) = Self::translate(event) {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) if receiver.is_disconnected() => break,
                    Err(_) => continue,
                }
            }
            debug!(service_type = %service_type, "mDNS reader exited");
        });

        Ok(rx)
    }

    fn stop_browse(&self, service_type: &str) {
        if let Err(e) = self.daemon.stop_browse(service_type) {
            warn!(service_type = %service_type, error = %e, "Failed to stop mDNS browse");
        }
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }
    }
}

// ============================================================================
// TCP resolution
// ============================================================================

/// Resolves an advertisement by connecting to each advertised address.
///
/// The first address that accepts a TCP connection wins; the connection is
/// dropped immediately.
#[derive(Debug, Clone)]
pub struct TcpResolver {
    connect_timeout: Duration,
}

impl TcpResolver {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl InstanceResolver for TcpResolver {
    async fn resolve(&self, advertisement: &Advertisement) -> Option<SocketAddr> {
        for ip in &advertisement.addresses {
            let target = SocketAddr::new(*ip, advertisement.port);
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target)).await {
                Ok(Ok(stream)) => {
                    let resolved = stream.peer_addr().unwrap_or(target);
                    debug!(
                        instance = %advertisement.instance,
                        address = %resolved,
                        "Advertisement resolved"
                    );
                    return Some(resolved);
                }
                Ok(Err(e)) => {
                    debug!(instance = %advertisement.instance, address = %target, error = %e, "Connect failed");
                }
                Err(_) => {
                    debug!(instance = %advertisement.instance, address = %target, "Connect timed out");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    fn advertisement(addresses: Vec<IpAddr>, port: u16) -> Advertisement {
        Advertisement {
            instance: "FalconEye @ test._falconeye._tcp.local.".to_string(),
            hostname: "test.local.".to_string(),
            addresses,
            port,
        }
    }

    #[tokio::test]
    async fn test_tcp_resolver_returns_listening_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let resolver = TcpResolver::new(Duration::from_millis(500));
        let resolved = resolver
            .resolve(&advertisement(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], port))
            .await;

        assert_eq!(resolved, Some(SocketAddr::from((Ipv4Addr::LOCALHOST, port))));
    }

    #[tokio::test]
    async fn test_tcp_resolver_none_when_nothing_listens() {
        // Bind then drop to get a port that refuses connections.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let resolver = TcpResolver::new(Duration::from_millis(200));
        let resolved = resolver
            .resolve(&advertisement(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], port))
            .await;

        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_tcp_resolver_none_without_addresses() {
        let resolver = TcpResolver::new(Duration::from_millis(200));
        assert!(resolver.resolve(&advertisement(vec![], 3000)).await.is_none());
    }
}
