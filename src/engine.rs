//! Composition root.
//!
//! Owns one instance of every component and wires their callbacks:
//!
//! ```text
//! [NetworkMonitor] --state--> start/stop [ServiceDiscovery] --update--> [EndpointSelector]
//!        |                                                                   ^
//!        +---------------------------state----------------------------------+
//! ```
//!
//! Discovery only runs while the network is reachable. Losing connectivity
//! stops it, which clears discovered candidates, and the selector publishes
//! the cloud relay.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::discovery::{
    parse_fallbacks, CandidateRegistry, InstanceResolver, MdnsBrowser, ServiceBrowser, ServiceDiscovery,
    TcpResolver,
};
use crate::network::{InterfaceSource, NetworkMonitor};
use crate::probe::{HttpHealthCheck, ProbeError};
use crate::selector::{EndpointSelector, Trigger};
use crate::settings::FileSettingsStore;

/// Error types for engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// The running resolver.
pub struct Engine {
    registry: Arc<CandidateRegistry>,
    selector: Arc<EndpointSelector>,
    discovery: Option<Arc<ServiceDiscovery>>,
    monitor: Arc<NetworkMonitor>,
}

impl Engine {
    /// Assemble from already-built components.
    ///
    /// `selector` and `discovery` must share `registry`.
    pub fn new(
        registry: Arc<CandidateRegistry>,
        selector: Arc<EndpointSelector>,
        discovery: Option<Arc<ServiceDiscovery>>,
        monitor: Arc<NetworkMonitor>,
    ) -> Self {
        Self {
            registry,
            selector,
            discovery,
            monitor,
        }
    }

    /// Build the production stack: reqwest health checks, mDNS discovery,
    /// OS interface monitoring and a JSON settings file.
    ///
    /// If the mDNS daemon cannot start, the engine runs without discovery
    /// and relies on static fallbacks.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let cloud_relay = config.cloud_relay()?;
        let registry = Arc::new(CandidateRegistry::new(parse_fallbacks(&config.static_fallbacks)));
        let health = Arc::new(HttpHealthCheck::new(&config.probe)?);
        let settings = Arc::new(FileSettingsStore::new(config.settings.resolved_path()));

        let selector = Arc::new(EndpointSelector::new(
            registry.clone(),
            health,
            settings,
            cloud_relay,
            config.probe.timeout(),
        ));

        let discovery = if config.discovery.enabled {
            match MdnsBrowser::new() {
                Ok(browser) => {
                    let browser: Arc<dyn ServiceBrowser> = Arc::new(browser);
                    let resolver: Arc<dyn InstanceResolver> =
                        Arc::new(TcpResolver::new(config.discovery.resolve_timeout()));
                    Some(Arc::new(ServiceDiscovery::new(
                        config.discovery.fully_qualified_type(),
                        browser,
                        resolver,
                        registry.clone(),
                    )))
                }
                Err(e) => {
                    warn!(error = %e, "mDNS unavailable, continuing without discovery");
                    None
                }
            }
        } else {
            info!("Service discovery disabled by configuration");
            None
        };

        let monitor = Arc::new(NetworkMonitor::with_source(
            Arc::new(InterfaceSource),
            config.network.rescan_interval(),
        ));

        Ok(Self::new(registry, selector, discovery, monitor))
    }

    /// Load the persisted override, start every component and request the
    /// startup pass.
    pub async fn start(&self) {
        self.selector.load_manual_override().await;
        self.selector.start();

        let selector = self.selector.clone();
        let discovery = self.discovery.clone();
        self.monitor.start(move |state| {
            if let Some(discovery) = &discovery {
                if state.reachable {
                    let selector = selector.clone();
                    discovery.start(move |_| selector.trigger(Trigger::CandidatesChanged));
                } else {
                    discovery.stop();
                }
            }
            selector.on_network_change(state);
        });

        self.selector.trigger(Trigger::Startup);
        info!(
            discovery = self.discovery.is_some(),
            candidates = self.registry.snapshot().len(),
            "Resolver engine started"
        );
    }

    /// Stop observation, discovery and the selector worker.
    pub fn stop(&self) {
        self.monitor.stop();
        if let Some(discovery) = &self.discovery {
            discovery.stop();
        }
        self.selector.stop();
        info!("Resolver engine stopped");
    }

    pub fn selector(&self) -> &Arc<EndpointSelector> {
        &self.selector
    }

    pub fn registry(&self) -> &Arc<CandidateRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn discovery(&self) -> Option<&Arc<ServiceDiscovery>> {
        self.discovery.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Candidate, Origin};
    use crate::network::{InterfaceKind, NetworkState};
    use crate::selector::ResolutionResult;
    use crate::settings::MemorySettingsStore;
    use crate::test_utils::{ChannelBrowser, FixedResolver, ScriptedHealthCheck};
    use std::time::Duration;
    use url::Url;

    const RELAY: &str = "https://relay.falconeye.test/";
    const STATIC: &str = "http://10.34.63.233:3000";

    struct Harness {
        engine: Engine,
        browser: Arc<ChannelBrowser>,
        health: Arc<ScriptedHealthCheck>,
    }

    fn harness(settings: MemorySettingsStore, network: NetworkState) -> Harness {
        let registry = Arc::new(CandidateRegistry::new(vec![
            Candidate::parse(STATIC, Origin::StaticFallback).unwrap()
        ]));
        let health = Arc::new(ScriptedHealthCheck::new());
        let browser = Arc::new(ChannelBrowser::new());
        let selector = Arc::new(EndpointSelector::new(
            registry.clone(),
            health.clone(),
            Arc::new(settings),
            Url::parse(RELAY).unwrap(),
            Duration::from_millis(50),
        ));
        let discovery = Arc::new(ServiceDiscovery::new(
            "_falconeye._tcp.local.",
            browser.clone(),
            Arc::new(FixedResolver::new()),
            registry.clone(),
        ));
        let monitor = Arc::new(NetworkMonitor::new(network));

        Harness {
            engine: Engine::new(registry, selector, Some(discovery), monitor),
            browser,
            health,
        }
    }

    async fn wait_for<F>(engine: &Engine, predicate: F) -> bool
    where
        F: Fn(&ResolutionResult) -> bool,
    {
        let mut rx = engine.selector().subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|r| predicate(r)))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    fn base_is(result: &ResolutionResult, expected: &str) -> bool {
        result.selected_base.as_str().trim_end_matches('/') == expected
    }

    #[tokio::test]
    async fn test_start_probes_and_browses_when_reachable() {
        let h = harness(MemorySettingsStore::new(), NetworkState::reachable(InterfaceKind::Wifi));
        h.health.healthy(STATIC);

        h.engine.start().await;

        assert!(wait_for(&h.engine, |r| base_is(r, STATIC)).await);
        assert!(h.browser.is_browsing());
        h.engine.stop();
    }

    #[tokio::test]
    async fn test_discovered_backend_takes_over() {
        let h = harness(MemorySettingsStore::new(), NetworkState::reachable(InterfaceKind::Wifi));
        h.health.healthy(STATIC);
        h.health.healthy("http://192.168.1.40:3000");
        h.engine.start().await;
        assert!(wait_for(&h.engine, |r| base_is(r, STATIC)).await);

        h.browser.advertise("cam-a", "192.168.1.40:3000".parse().unwrap());

        assert!(wait_for(&h.engine, |r| base_is(r, "http://192.168.1.40:3000")).await);
        h.engine.stop();
    }

    #[tokio::test]
    async fn test_losing_network_stops_discovery_and_uses_cloud() {
        let h = harness(MemorySettingsStore::new(), NetworkState::reachable(InterfaceKind::Wifi));
        h.health.healthy("http://192.168.1.40:3000");
        h.engine.start().await;
        h.browser.advertise("cam-a", "192.168.1.40:3000".parse().unwrap());
        assert!(wait_for(&h.engine, |r| r.is_local).await);

        h.engine.monitor().report(NetworkState::unreachable());

        assert!(wait_for(&h.engine, |r| r.selected_base.as_str() == RELAY).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!h.browser.is_browsing());
        assert!(h.engine.registry().discovered().is_empty());

        h.engine.monitor().report(NetworkState::reachable(InterfaceKind::Cellular));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.browser.browse_count(), 2);
        h.engine.stop();
    }

    #[tokio::test]
    async fn test_unreachable_at_start_publishes_cloud_without_discovery() {
        let h = harness(MemorySettingsStore::new(), NetworkState::unreachable());
        h.health.healthy(STATIC);

        h.engine.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.engine.selector().current().selected_base.as_str(), RELAY);
        assert!(!h.browser.is_browsing());
        assert_eq!(h.health.call_count(), 0);
        h.engine.stop();
    }

    #[tokio::test]
    async fn test_persisted_override_wins_at_startup() {
        let h = harness(
            MemorySettingsStore::with_override("http://192.168.1.20:3000"),
            NetworkState::reachable(InterfaceKind::Wifi),
        );
        h.health.healthy(STATIC);

        h.engine.start().await;

        assert!(wait_for(&h.engine, |r| base_is(r, "http://192.168.1.20:3000")).await);
        assert_eq!(h.health.call_count(), 0);
        h.engine.stop();
    }

    #[tokio::test]
    async fn test_stop_halts_discovery() {
        let h = harness(MemorySettingsStore::new(), NetworkState::reachable(InterfaceKind::Wifi));
        h.engine.start().await;
        assert!(h.browser.is_browsing());

        h.engine.stop();

        assert!(!h.browser.is_browsing());
        assert!(!h.engine.discovery().unwrap().is_running());
    }

    #[test]
    fn test_from_config_rejects_loopback_relay() {
        let config = Config {
            cloud_relay_url: "http://127.0.0.1".to_string(),
            ..Config::default()
        };
        assert!(matches!(Engine::from_config(&config), Err(EngineError::Config(_))));
    }
}
