//! Network state monitoring.
//!
//! Classifies connectivity into reachable / unreachable plus an interface
//! kind, and reports transitions to a single observer. State arrives either
//! pushed by the host (`report`) or polled from the OS interface table by an
//! optional rescan task.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::utils::lock;

/// Kind of the interface currently carrying traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Wifi,
    Cellular,
    Other,
    None,
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Wifi => write!(f, "wifi"),
            InterfaceKind::Cellular => write!(f, "cellular"),
            InterfaceKind::Other => write!(f, "other"),
            InterfaceKind::None => write!(f, "none"),
        }
    }
}

/// Connectivity snapshot. Each new snapshot supersedes the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
    pub reachable: bool,
    pub interface_kind: InterfaceKind,
}

impl NetworkState {
    pub fn reachable(interface_kind: InterfaceKind) -> Self {
        Self {
            reachable: true,
            interface_kind,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            interface_kind: InterfaceKind::None,
        }
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::unreachable()
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reachable {
            write!(f, "reachable via {}", self.interface_kind)
        } else {
            write!(f, "unreachable")
        }
    }
}

/// Something that can report the current connectivity on demand.
pub trait ConnectivitySource: Send + Sync {
    fn current(&self) -> NetworkState;
}

// ============================================================================
// Interface classification
// ============================================================================

/// One OS interface reduced to what classification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    pub name: String,
    pub addresses: Vec<IpAddr>,
}

const WIFI_PREFIXES: &[&str] = &["wl", "wifi", "ath", "ra"];
const CELLULAR_PREFIXES: &[&str] = &["rmnet", "wwan", "pdp_ip", "ccmni", "usb", "ppp"];

fn usable_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_unspecified() && !v4.is_link_local(),
        // fe80::/10 is only valid on-link and never carries routed traffic.
        IpAddr::V6(v6) => !v6.is_loopback() && !v6.is_unspecified() && (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}

fn kind_of(name: &str) -> InterfaceKind {
    let name = name.to_ascii_lowercase();
    if WIFI_PREFIXES.iter().any(|p| name.starts_with(p)) {
        InterfaceKind::Wifi
    } else if CELLULAR_PREFIXES.iter().any(|p| name.starts_with(p)) {
        InterfaceKind::Cellular
    } else {
        InterfaceKind::Other
    }
}

/// Classify a set of interfaces.
///
/// Loopback and link-local-only interfaces do not count. Wifi wins over
/// cellular, which wins over anything else.
pub fn classify(interfaces: &[InterfaceSnapshot]) -> NetworkState {
    let kinds: Vec<InterfaceKind> = interfaces
        .iter()
        .filter(|iface| iface.addresses.iter().any(usable_address))
        .map(|iface| kind_of(&iface.name))
        .collect();

    [InterfaceKind::Wifi, InterfaceKind::Cellular, InterfaceKind::Other]
        .into_iter()
        .find(|kind| kinds.contains(kind))
        .map(NetworkState::reachable)
        .unwrap_or_else(NetworkState::unreachable)
}

/// Connectivity read from the OS interface table.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceSource;

impl ConnectivitySource for InterfaceSource {
    fn current(&self) -> NetworkState {
        match NetworkInterface::show() {
            Ok(interfaces) => {
                let snapshots: Vec<InterfaceSnapshot> = interfaces
                    .into_iter()
                    .map(|iface| InterfaceSnapshot {
                        addresses: iface.addr.iter().map(|a| a.ip()).collect(),
                        name: iface.name,
                    })
                    .collect();
                classify(&snapshots)
            }
            Err(e) => {
                warn!(error = %e, "Failed to list network interfaces");
                NetworkState::unreachable()
            }
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

struct Observation {
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Reports connectivity transitions to one observer.
pub struct NetworkMonitor {
    state: watch::Sender<NetworkState>,
    source: Option<Arc<dyn ConnectivitySource>>,
    rescan_interval: Option<Duration>,
    observation: Mutex<Option<Observation>>,
}

impl NetworkMonitor {
    /// Monitor fed only through [`report`](Self::report).
    pub fn new(initial: NetworkState) -> Self {
        Self {
            state: watch::channel(initial).0,
            source: None,
            rescan_interval: None,
            observation: Mutex::new(None),
        }
    }

    /// Monitor that reads `source` on start and, if `rescan_interval` is
    /// set, again on every tick while started.
    pub fn with_source(source: Arc<dyn ConnectivitySource>, rescan_interval: Option<Duration>) -> Self {
        let initial = source.current();
        Self {
            state: watch::channel(initial).0,
            source: Some(source),
            rescan_interval,
            observation: Mutex::new(None),
        }
    }

    /// Latest known state.
    pub fn current(&self) -> NetworkState {
        *self.state.borrow()
    }

    /// Record a new snapshot. Returns `true` if it differs from the last one.
    pub fn report(&self, state: NetworkState) -> bool {
        apply(&self.state, state)
    }

    /// Start observing. `on_change` receives the current state immediately,
    /// then one snapshot per transition. A no-op if already started.
    ///
    /// Snapshots that are superseded before the observer runs are skipped;
    /// the observer always sees the latest state.
    pub fn start<F>(&self, on_change: F)
    where
        F: Fn(NetworkState) + Send + Sync + 'static,
    {
        let mut observation = lock(&self.observation);
        if observation.is_some() {
            debug!("Network monitor already running");
            return;
        }

        if let Some(source) = &self.source {
            self.report(source.current());
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(2);

        let mut updates = self.state.subscribe();
        let initial = *updates.borrow_and_update();
        on_change(initial);
        tasks.push(tokio::spawn(forward_changes(updates, cancel_rx.clone(), initial, on_change)));

        if let (Some(source), Some(interval)) = (self.source.clone(), self.rescan_interval) {
            tasks.push(tokio::spawn(rescan(source, self.state.clone(), interval, cancel_rx)));
        }

        info!(state = %initial, "Network monitor started");
        *observation = Some(Observation {
            cancel: cancel_tx,
            tasks,
        });
    }

    /// Stop observing. Reports made afterwards still update [`current`](Self::current).
    pub fn stop(&self) {
        if let Some(observation) = lock(&self.observation).take() {
            let _ = observation.cancel.send(true);
            for task in observation.tasks {
                task.abort();
            }
            info!("Network monitor stopped");
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        if let Some(observation) = lock(&self.observation).take() {
            for task in observation.tasks {
                task.abort();
            }
        }
    }
}

fn apply(sender: &watch::Sender<NetworkState>, next: NetworkState) -> bool {
    let changed = sender.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
    if changed {
        info!(state = %next, "Network state changed");
    }
    changed
}

async fn forward_changes<F>(
    mut updates: watch::Receiver<NetworkState>,
    mut cancel: watch::Receiver<bool>,
    mut last: NetworkState,
    on_change: F,
) where
    F: Fn(NetworkState) + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *updates.borrow_and_update();
                if state != last {
                    last = state;
                    on_change(state);
                }
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
        }
    }
}

async fn rescan(
    source: Arc<dyn ConnectivitySource>,
    state: watch::Sender<NetworkState>,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and start() already sampled.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Interface enumeration is a blocking syscall.
                let source = source.clone();
                match tokio::task::spawn_blocking(move || source.current()).await {
                    Ok(next) => {
                        apply(&state, next);
                    }
                    Err(e) => warn!(error = %e, "Interface scan failed"),
                }
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
        }
    }
}
