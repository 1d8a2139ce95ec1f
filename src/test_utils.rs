//! Test utilities and scripted fakes.
//!
//! Stand-ins for the network-facing traits so resolution passes can be driven
//! without a LAN, an mDNS responder or a live backend.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Semaphore};

use crate::discovery::{Advertisement, BrowseEvent, Candidate, DiscoveryError, InstanceResolver, ServiceBrowser};
use crate::network::{ConnectivitySource, NetworkState};
use crate::probe::{HealthCheck, ProbeError};
use crate::utils::lock;

/// Scripted answer for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Status(u16),
    Timeout,
}

/// Health check answering from a per-identity script.
///
/// Unscripted candidates time out. When gated, every check blocks until a
/// permit is released, which lets tests hold a pass in flight.
pub struct ScriptedHealthCheck {
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    calls: Mutex<Vec<String>>,
    call_count: watch::Sender<usize>,
    gate: Option<Arc<Semaphore>>,
}

impl Default for ScriptedHealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHealthCheck {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            call_count: watch::channel(0).0,
            gate: None,
        }
    }

    /// Checks block until [`release`](Self::release) is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    /// Script `identity` (e.g. `http://10.0.0.5:3000`).
    pub fn set(&self, identity: &str, outcome: ProbeOutcome) {
        lock(&self.outcomes).insert(identity.to_string(), outcome);
    }

    pub fn healthy(&self, identity: &str) {
        self.set(identity, ProbeOutcome::Healthy);
    }

    /// Let `n` gated checks complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Identities checked so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.borrow()
    }

    /// Wait until at least `n` checks have started. Returns `false` on timeout.
    pub async fn wait_for_calls(&self, n: usize, timeout: Duration) -> bool {
        let mut rx = self.call_count.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|count| *count >= n))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl HealthCheck for ScriptedHealthCheck {
    async fn check(&self, candidate: &Candidate) -> Result<(), ProbeError> {
        let identity = candidate.identity();
        lock(&self.calls).push(identity.clone());
        self.call_count.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let outcome = lock(&self.outcomes)
            .get(&identity)
            .copied()
            .unwrap_or(ProbeOutcome::Timeout);

        match outcome {
            ProbeOutcome::Healthy => Ok(()),
            ProbeOutcome::Status(status) => Err(ProbeError::Unhealthy {
                candidate: identity,
                status,
            }),
            ProbeOutcome::Timeout => Err(ProbeError::Timeout { candidate: identity }),
        }
    }
}

/// Browser whose events are pushed by the test.
#[derive(Default)]
pub struct ChannelBrowser {
    sender: Mutex<Option<mpsc::UnboundedSender<BrowseEvent>>>,
    browse_count: Mutex<usize>,
    stop_count: Mutex<usize>,
    fail: Mutex<bool>,
}

impl ChannelBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `browse` calls fail.
    pub fn set_fail(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    /// Deliver an event to the active browse. Returns `false` if none is active.
    pub fn emit(&self, event: BrowseEvent) -> bool {
        lock(&self.sender)
            .as_ref()
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }

    pub fn advertise(&self, instance: &str, addr: SocketAddr) -> bool {
        self.emit(BrowseEvent::Resolved(Advertisement {
            instance: instance.to_string(),
            hostname: format!("{instance}.local."),
            addresses: vec![addr.ip()],
            port: addr.port(),
        }))
    }

    pub fn withdraw(&self, instance: &str) -> bool {
        self.emit(BrowseEvent::Removed {
            instance: instance.to_string(),
        })
    }

    pub fn is_browsing(&self) -> bool {
        lock(&self.sender).is_some()
    }

    pub fn browse_count(&self) -> usize {
        *lock(&self.browse_count)
    }

    pub fn stop_count(&self) -> usize {
        *lock(&self.stop_count)
    }
}

impl ServiceBrowser for ChannelBrowser {
    fn browse(&self, service_type: &str) -> Result<mpsc::UnboundedReceiver<BrowseEvent>, DiscoveryError> {
        if *lock(&self.fail) {
            return Err(DiscoveryError::Browse {
                service_type: service_type.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.sender) = Some(tx);
        *lock(&self.browse_count) += 1;
        Ok(rx)
    }

    fn stop_browse(&self, _service_type: &str) {
        lock(&self.sender).take();
        *lock(&self.stop_count) += 1;
    }
}

/// Resolver that maps every advertisement to its first advertised address,
/// optionally after a delay, unless the instance is scripted to fail.
#[derive(Default)]
pub struct FixedResolver {
    delay: Option<Duration>,
    unresolvable: Mutex<Vec<String>>,
}

impl FixedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_instance(&self, instance: &str) {
        lock(&self.unresolvable).push(instance.to_string());
    }
}

#[async_trait]
impl InstanceResolver for FixedResolver {
    async fn resolve(&self, advertisement: &Advertisement) -> Option<SocketAddr> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.unresolvable).contains(&advertisement.instance) {
            return None;
        }
        advertisement
            .addresses
            .first()
            .map(|ip| SocketAddr::new(*ip, advertisement.port))
    }
}

/// Connectivity source whose answer the test flips.
pub struct SwitchableConnectivity {
    state: Mutex<NetworkState>,
}

impl SwitchableConnectivity {
    pub fn new(state: NetworkState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set(&self, state: NetworkState) {
        *lock(&self.state) = state;
    }
}

impl ConnectivitySource for SwitchableConnectivity {
    fn current(&self) -> NetworkState {
        *lock(&self.state)
    }
}
