//! Endpoint selection.
//!
//! The selector owns the single published [`ResolutionResult`] and the one
//! worker task that produces it. Every trigger (startup, connectivity,
//! discovery, override, refresh, mode change) lands here; probing runs on the
//! worker, never on the caller.
//!
//! ```text
//! trigger() --> [pending slot] --Notify--> [worker] --probe--> publish (watch)
//! ```
//!
//! Triggers that arrive while a pass is in flight overwrite the pending slot
//! and leave one stored wake-up, so they collapse into exactly one follow-up
//! pass carrying the most recent trigger. Mode changes and loss of
//! connectivity bump a generation counter; a pass started under an older
//! generation finishes but its result is discarded.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::discovery::{is_loopback_url, parse_override, Candidate, CandidateRegistry};
use crate::network::NetworkState;
use crate::probe::{worst_case_latency, HealthCheck, Prober};
use crate::settings::{SettingsError, SettingsStore};
use crate::utils::lock;

/// Selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Probe candidates, fall back to the cloud relay.
    #[default]
    Auto,
    /// Pin the last known good local candidate.
    ForcedLocal,
    /// Always use the cloud relay.
    ForcedCloud,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Auto => write!(f, "auto"),
            Mode::ForcedLocal => write!(f, "forced-local"),
            Mode::ForcedCloud => write!(f, "forced-cloud"),
        }
    }
}

/// Why a re-evaluation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    NetworkChanged,
    CandidatesChanged,
    ManualOverrideChanged,
    Refresh,
    ModeChanged,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Startup => "startup",
            Trigger::NetworkChanged => "network-changed",
            Trigger::CandidatesChanged => "candidates-changed",
            Trigger::ManualOverrideChanged => "manual-override-changed",
            Trigger::Refresh => "refresh",
            Trigger::ModeChanged => "mode-changed",
        };
        f.write_str(name)
    }
}

/// Coarse link label for status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Local backend on the home LAN (`192.168.*`).
    Home,
    /// Local backend on any other private network, e.g. a phone hotspot.
    Hotspot,
    /// Cloud relay.
    Cloud,
}

/// Outcome of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    /// Base address consumers should use. Never loopback.
    pub selected_base: Url,
    /// Whether `selected_base` is a local candidate.
    pub is_local: bool,
    /// The local candidate behind `selected_base`, when local.
    pub active_candidate: Option<Candidate>,
    pub resolved_at: DateTime<Utc>,
}

impl ResolutionResult {
    pub fn cloud(relay: Url) -> Self {
        Self {
            selected_base: relay,
            is_local: false,
            active_candidate: None,
            resolved_at: Utc::now(),
        }
    }

    pub fn link_kind(&self) -> LinkKind {
        match &self.active_candidate {
            Some(candidate) if self.is_local => {
                if candidate.host().starts_with("192.168.") {
                    LinkKind::Home
                } else {
                    LinkKind::Hotspot
                }
            }
            _ => LinkKind::Cloud,
        }
    }
}

/// Debug view of the selector.
#[derive(Debug, Clone)]
pub struct SelectorStatus {
    pub mode: Mode,
    pub network: Option<NetworkState>,
    pub current: Arc<ResolutionResult>,
    pub link: LinkKind,
    pub has_manual_override: bool,
    pub evaluations: u64,
}

struct SelectorState {
    mode: Mode,
    generation: u64,
    /// `None` until the monitor first reports; treated as reachable.
    network: Option<NetworkState>,
    last_local: Option<Candidate>,
    pending: Option<Trigger>,
}

/// Everything one pass needs, captured when it starts.
struct Pass {
    trigger: Trigger,
    mode: Mode,
    generation: u64,
    reachable: bool,
    last_local: Option<Candidate>,
}

struct Inner {
    registry: Arc<CandidateRegistry>,
    prober: Prober,
    settings: Arc<dyn SettingsStore>,
    cloud_relay: Url,
    probe_timeout: Duration,
    state: Mutex<SelectorState>,
    wake: Notify,
    published: watch::Sender<Arc<ResolutionResult>>,
    evaluations: watch::Sender<u64>,
    override_write: tokio::sync::Mutex<()>,
}

struct Worker {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Picks and publishes the base address.
pub struct EndpointSelector {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
}

impl EndpointSelector {
    /// Create a selector. The initial published result is the cloud relay.
    ///
    /// `cloud_relay` must not be loopback; use [`Config::cloud_relay`] to get
    /// a validated one. `probe_timeout` is the per-candidate timeout of the
    /// health check and is only used to report pass latency bounds.
    ///
    /// [`Config::cloud_relay`]: crate::config::Config::cloud_relay
    pub fn new(
        registry: Arc<CandidateRegistry>,
        health: Arc<dyn HealthCheck>,
        settings: Arc<dyn SettingsStore>,
        cloud_relay: Url,
        probe_timeout: Duration,
    ) -> Self {
        if is_loopback_url(&cloud_relay) {
            warn!(relay = %cloud_relay, "Cloud relay is a loopback address");
        }

        let initial = Arc::new(ResolutionResult::cloud(cloud_relay.clone()));
        Self {
            inner: Arc::new(Inner {
                registry,
                prober: Prober::new(health),
                settings,
                cloud_relay,
                probe_timeout,
                state: Mutex::new(SelectorState {
                    mode: Mode::Auto,
                    generation: 0,
                    network: None,
                    last_local: None,
                    pending: None,
                }),
                wake: Notify::new(),
                published: watch::channel(initial).0,
                evaluations: watch::channel(0).0,
                override_write: tokio::sync::Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the evaluation worker. A no-op if already running.
    ///
    /// Triggers recorded before start are evaluated as soon as it runs.
    pub fn start(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run(self.inner.clone(), cancel_rx));
        info!(relay = %self.inner.cloud_relay, "Endpoint selector started");
        *worker = Some(Worker { cancel, task });
    }

    /// Stop the worker. An in-flight pass is abandoned unpublished.
    pub fn stop(&self) {
        if let Some(worker) = lock(&self.worker).take() {
            let _ = worker.cancel.send(true);
            worker.task.abort();
            info!("Endpoint selector stopped");
        }
    }

    /// Request a re-evaluation. Never blocks; never probes on the caller.
    pub fn trigger(&self, trigger: Trigger) {
        self.inner.trigger(trigger);
    }

    /// Re-evaluate now, e.g. after the user pulls to refresh.
    pub fn refresh(&self) {
        self.trigger(Trigger::Refresh);
    }

    /// Probe in `Auto` mode from now on.
    pub fn auto(&self) {
        {
            let mut state = self.inner.lock_state();
            state.mode = Mode::Auto;
            state.generation += 1;
        }
        info!(mode = %Mode::Auto, "Selection mode changed");
        self.trigger(Trigger::ModeChanged);
    }

    /// Publish the cloud relay immediately, without probing, and keep it.
    pub fn force_cloud(&self) {
        let mut state = self.inner.lock_state();
        state.mode = Mode::ForcedCloud;
        state.generation += 1;
        state.pending = None;
        info!(mode = %Mode::ForcedCloud, "Selection mode changed");
        self.inner
            .publish_locked(&mut state, ResolutionResult::cloud(self.inner.cloud_relay.clone()));
    }

    /// Pin the last known good local candidate.
    ///
    /// Published immediately without probing when one is known. Otherwise an
    /// ordinary probe pass runs and its winner becomes the pin.
    pub fn force_local(&self) {
        let mut state = self.inner.lock_state();
        state.mode = Mode::ForcedLocal;
        state.generation += 1;
        info!(mode = %Mode::ForcedLocal, "Selection mode changed");

        let last_local = state.last_local.clone();
        match last_local {
            Some(candidate) => {
                state.pending = None;
                let result = self.inner.local_result(candidate);
                self.inner.publish_locked(&mut state, result);
            }
            None => {
                debug!("No known local candidate, probing");
                drop(state);
                self.trigger(Trigger::ModeChanged);
            }
        }
    }

    /// Feed a connectivity snapshot.
    ///
    /// Becoming reachable, or switching interface while reachable, triggers
    /// a pass. Becoming unreachable publishes the cloud relay at once in
    /// `Auto` mode and invalidates any pass in flight. Returns `true` if a
    /// pass was triggered.
    pub fn on_network_change(&self, network: NetworkState) -> bool {
        let mut state = self.inner.lock_state();
        let previous = state.network.replace(network);

        if !network.reachable {
            if previous.map_or(true, |p| p.reachable) {
                state.generation += 1;
                state.pending = None;
                state.last_local = None;
                if state.mode == Mode::Auto {
                    info!("Network unreachable, using cloud relay");
                    let cloud = ResolutionResult::cloud(self.inner.cloud_relay.clone());
                    self.inner.publish_locked(&mut state, cloud);
                }
            }
            return false;
        }

        let should_trigger = match previous {
            None => true,
            Some(previous) => !previous.reachable || previous.interface_kind != network.interface_kind,
        };
        drop(state);

        if should_trigger {
            self.trigger(Trigger::NetworkChanged);
        }
        should_trigger
    }

    /// Load the persisted manual override into the registry.
    ///
    /// A malformed or unreadable value is treated as absent.
    pub async fn load_manual_override(&self) {
        let raw = match self.inner.settings.manual_override().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to read manual override, ignoring");
                None
            }
        };
        let candidate = parse_override(raw.as_deref());
        if let Some(candidate) = &candidate {
            info!(candidate = %candidate.identity(), "Loaded manual override");
        }
        self.inner.registry.set_manual_override(candidate);
    }

    /// Persist a new manual override (or clear it with `None` / empty) and
    /// re-evaluate.
    ///
    /// The value is stored as given; a value that is not a well-formed http(s)
    /// URL is kept on disk but treated as absent. The write completes before
    /// the registry changes, and the registry changes before the trigger.
    pub async fn set_manual_override(&self, value: Option<&str>) -> Result<(), SettingsError> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());

        let _guard = self.inner.override_write.lock().await;
        self.inner.settings.set_manual_override(value).await?;
        self.inner.registry.set_manual_override(parse_override(value));
        self.trigger(Trigger::ManualOverrideChanged);
        Ok(())
    }

    /// Change notifications for the published result.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ResolutionResult>> {
        self.inner.published.subscribe()
    }

    /// Number of completed passes, as a watchable counter.
    pub fn evaluations(&self) -> watch::Receiver<u64> {
        self.inner.evaluations.subscribe()
    }

    pub fn evaluation_count(&self) -> u64 {
        *self.inner.evaluations.borrow()
    }

    pub fn current(&self) -> Arc<ResolutionResult> {
        self.inner.published.borrow().clone()
    }

    pub fn current_base_url(&self) -> Url {
        self.inner.published.borrow().selected_base.clone()
    }

    /// Current base joined with a REST path, e.g. `url_for("/events")`.
    pub fn url_for(&self, endpoint: &str) -> Result<Url, url::ParseError> {
        self.current_base_url().join(endpoint)
    }

    pub fn cloud_relay(&self) -> &Url {
        &self.inner.cloud_relay
    }

    pub fn mode(&self) -> Mode {
        self.inner.lock_state().mode
    }

    pub fn status(&self) -> SelectorStatus {
        let (mode, network) = {
            let state = self.inner.lock_state();
            (state.mode, state.network)
        };
        let current = self.current();
        SelectorStatus {
            mode,
            network,
            link: current.link_kind(),
            current,
            has_manual_override: self.inner.registry.snapshot().manual_override.is_some(),
            evaluations: self.evaluation_count(),
        }
    }
}

impl Drop for EndpointSelector {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.task.abort();
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SelectorState> {
        lock(&self.state)
    }

    fn trigger(&self, trigger: Trigger) {
        {
            let mut state = self.lock_state();
            if let Some(replaced) = state.pending.replace(trigger) {
                debug!(replaced = %replaced, trigger = %trigger, "Coalescing re-evaluation");
            }
        }
        self.wake.notify_one();
    }

    fn take_pass(&self) -> Option<Pass> {
        let mut state = self.lock_state();
        let trigger = state.pending.take()?;
        Some(Pass {
            trigger,
            mode: state.mode,
            generation: state.generation,
            reachable: state.network.map_or(true, |n| n.reachable),
            last_local: state.last_local.clone(),
        })
    }

    async fn evaluate(&self, pass: Pass) {
        let (result, probed) = match pass.mode {
            Mode::ForcedCloud => (self.cloud_result(), false),
            Mode::ForcedLocal => match pass.last_local.clone() {
                Some(candidate) => (self.local_result(candidate), false),
                None => (self.probe_pass(&pass).await, true),
            },
            Mode::Auto => (self.probe_pass(&pass).await, true),
        };

        let mut state = self.lock_state();
        if state.generation == pass.generation {
            let is_local = self.publish_locked(&mut state, result);
            if probed && !is_local {
                // Nothing local answered; there is no known good candidate.
                state.last_local = None;
            }
        } else {
            debug!(trigger = %pass.trigger, "Discarding result from superseded pass");
        }
        drop(state);

        self.evaluations.send_modify(|n| *n += 1);
    }

    async fn probe_pass(&self, pass: &Pass) -> ResolutionResult {
        if !pass.reachable {
            debug!(trigger = %pass.trigger, "Network unreachable, skipping probe");
            return self.cloud_result();
        }

        let order = self.registry.snapshot().probe_order();
        debug!(
            trigger = %pass.trigger,
            candidates = order.len(),
            worst_case_ms = worst_case_latency(self.probe_timeout, order.len()).as_millis() as u64,
            "Probing candidates"
        );

        match self.prober.probe(&order).await {
            Some(winner) => self.local_result(winner),
            None => self.cloud_result(),
        }
    }

    fn cloud_result(&self) -> ResolutionResult {
        ResolutionResult::cloud(self.cloud_relay.clone())
    }

    fn local_result(&self, candidate: Candidate) -> ResolutionResult {
        match candidate.base_url() {
            Ok(selected_base) => ResolutionResult {
                selected_base,
                is_local: true,
                active_candidate: Some(candidate),
                resolved_at: Utc::now(),
            },
            Err(e) => {
                warn!(candidate = %candidate.identity(), error = %e, "Unusable candidate URL");
                self.cloud_result()
            }
        }
    }

    /// Replace loopback selections with the cloud relay.
    fn loopback_guard(&self, result: ResolutionResult) -> ResolutionResult {
        if is_loopback_url(&result.selected_base) {
            warn!(selected = %result.selected_base, "Refusing loopback address, using cloud relay");
            return self.cloud_result();
        }
        result
    }

    /// Publish `result` and return whether the published endpoint is local.
    fn publish_locked(&self, state: &mut SelectorState, result: ResolutionResult) -> bool {
        let result = self.loopback_guard(result);
        if result.is_local {
            state.last_local = result.active_candidate.clone();
        }

        let previous = self.published.borrow().selected_base.clone();
        if previous != result.selected_base {
            info!(
                base = %result.selected_base,
                is_local = result.is_local,
                mode = %state.mode,
                "Published endpoint"
            );
        } else {
            debug!(base = %result.selected_base, "Endpoint unchanged");
        }
        let is_local = result.is_local;
        self.published.send_replace(Arc::new(result));
        is_local
    }
}

async fn run(inner: Arc<Inner>, mut cancel: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = inner.wake.notified() => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
        }

        // A wake-up stored during the previous pass may find the slot empty.
        let Some(pass) = inner.take_pass() else {
            continue;
        };
        inner.evaluate(pass).await;
    }
    debug!("Selector worker exited");
}
