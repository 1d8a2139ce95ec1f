//! Continuous local service discovery.
//!
//! While started, browses the backend's DNS-SD service type and resolves each
//! advertised instance in its own task. Every resolution is an independent
//! incremental update to the [`CandidateRegistry`]; there is no notion of a
//! complete discovery round.
//!
//! ```text
//! [ServiceBrowser] --BrowseEvent--> [browse loop] --spawn--> [resolution task per instance]
//!                                                                 |
//!                                                                 v
//!                                                 [CandidateRegistry] -> on_update(set)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::browser::{Advertisement, BrowseEvent, InstanceResolver, ServiceBrowser};
use super::candidate::Candidate;
use super::registry::{CandidateRegistry, CandidateSet};
use crate::utils::lock;

/// Callback invoked with the discovered set after it changes.
pub type UpdateCallback = Arc<dyn Fn(CandidateSet) + Send + Sync>;

/// Per-instance bookkeeping for one browse session.
#[derive(Default)]
struct Instances {
    /// In-flight resolution tasks by instance name.
    resolving: HashMap<String, JoinHandle<()>>,
    /// Candidate identity each instance resolved to.
    resolved: HashMap<String, String>,
}

struct Session {
    cancel: watch::Sender<bool>,
    browse_task: JoinHandle<()>,
    instances: Arc<Mutex<Instances>>,
}

/// DNS-SD discovery feeding the candidate registry.
pub struct ServiceDiscovery {
    service_type: String,
    browser: Arc<dyn ServiceBrowser>,
    resolver: Arc<dyn InstanceResolver>,
    registry: Arc<CandidateRegistry>,
    session: Mutex<Option<Session>>,
}

impl ServiceDiscovery {
    /// Create a discovery service.
    ///
    /// `service_type` is the fully qualified DNS-SD type, e.g.
    /// `_falconeye._tcp.local.`.
    pub fn new(
        service_type: impl Into<String>,
        browser: Arc<dyn ServiceBrowser>,
        resolver: Arc<dyn InstanceResolver>,
        registry: Arc<CandidateRegistry>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            browser,
            resolver,
            registry,
            session: Mutex::new(None),
        }
    }

    /// Whether a browse session is active.
    pub fn is_running(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Start browsing. A no-op if already started.
    ///
    /// Returns immediately; `on_update` is called from discovery tasks with
    /// the full discovered set whenever a new instance resolves or an
    /// instance goes away.
    pub fn start<F>(&self, on_update: F)
    where
        F: Fn(CandidateSet) + Send + Sync + 'static,
    {
        let mut session = self.lock_session();
        if session.is_some() {
            debug!(service_type = %self.service_type, "Discovery already running");
            return;
        }

        let events = match self.browser.browse(&self.service_type) {
            Ok(events) => events,
            Err(e) => {
                warn!(service_type = %self.service_type, error = %e, "Failed to start discovery");
                return;
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let instances = Arc::new(Mutex::new(Instances::default()));

        let browse_task = tokio::spawn(browse_loop(
            events,
            cancel_rx,
            instances.clone(),
            self.resolver.clone(),
            self.registry.clone(),
            Arc::new(on_update),
        ));

        info!(service_type = %self.service_type, "Service discovery started");

        *session = Some(Session {
            cancel: cancel_tx,
            browse_task,
            instances,
        });
    }

    /// Stop browsing, cancel in-flight resolutions and forget discovered candidates.
    pub fn stop(&self) {
        let Some(session) = self.lock_session().take() else {
            return;
        };

        let _ = session.cancel.send(true);
        session.browse_task.abort();
        self.browser.stop_browse(&self.service_type);

        let cancelled = {
            let mut instances = lock(&session.instances);
            let count = instances.resolving.len();
            for (_, task) in instances.resolving.drain() {
                task.abort();
            }
            instances.resolved.clear();
            self.registry.clear_discovered();
            count
        };

        info!(
            service_type = %self.service_type,
            cancelled_resolutions = cancelled,
            "Service discovery stopped"
        );
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        lock(&self.session)
    }
}

impl Drop for ServiceDiscovery {
    fn drop(&mut self) {
        if let Some(session) = self.lock_session().take() {
            let _ = session.cancel.send(true);
            session.browse_task.abort();
            for (_, task) in lock(&session.instances).resolving.drain() {
                task.abort();
            }
        }
    }
}

async fn browse_loop(
    mut events: mpsc::UnboundedReceiver<BrowseEvent>,
    mut cancel: watch::Receiver<bool>,
    instances: Arc<Mutex<Instances>>,
    resolver: Arc<dyn InstanceResolver>,
    registry: Arc<CandidateRegistry>,
    on_update: UpdateCallback,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    debug!("Browse event stream closed");
                    break;
                }
            },
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
        };

        match event {
            BrowseEvent::Resolved(advertisement) => {
                let instance = advertisement.instance.clone();
                let task = tokio::spawn(resolve_instance(
                    advertisement,
                    cancel.clone(),
                    instances.clone(),
                    resolver.clone(),
                    registry.clone(),
                    on_update.clone(),
                ));
                if let Some(previous) = lock(&instances).resolving.insert(instance, task) {
                    previous.abort();
                }
            }
            BrowseEvent::Removed { instance } => {
                let removed = {
                    let mut guard = lock(&instances);
                    if let Some(task) = guard.resolving.remove(&instance) {
                        task.abort();
                    }
                    // Another instance may still resolve to the same address.
                    guard.resolved.remove(&instance).is_some_and(|identity| {
                        !guard.resolved.values().any(|id| *id == identity) && registry.remove_discovered(&identity)
                    })
                };
                debug!(instance = %instance, "Advertisement withdrawn");

                if removed {
                    on_update(registry.discovered());
                }
            }
        }
    }
}

async fn resolve_instance(
    advertisement: Advertisement,
    mut cancel: watch::Receiver<bool>,
    instances: Arc<Mutex<Instances>>,
    resolver: Arc<dyn InstanceResolver>,
    registry: Arc<CandidateRegistry>,
    on_update: UpdateCallback,
) {
    let resolved = tokio::select! {
        resolved = resolver.resolve(&advertisement) => resolved,
        _ = cancel.changed() => return,
    };

    if *cancel.borrow() {
        return;
    }

    let Some(addr) = resolved else {
        debug!(instance = %advertisement.instance, "Advertisement did not resolve, dropping");
        lock(&instances).resolving.remove(&advertisement.instance);
        return;
    };

    let candidate = Candidate::discovered(addr, Utc::now());
    let identity = candidate.identity();

    // Registry writes happen under the instances lock so `stop()` cannot
    // clear the registry between the cancel check and the insert.
    let (added, moved_from) = {
        let mut guard = lock(&instances);
        if *cancel.borrow() {
            return;
        }
        guard.resolving.remove(&advertisement.instance);
        let previous = guard.resolved.insert(advertisement.instance.clone(), identity.clone());
        let moved_from = previous.filter(|old| {
            *old != identity
                && !guard.resolved.values().any(|id| id == old)
                && registry.remove_discovered(old)
        });
        (registry.add_discovered(candidate), moved_from)
    };

    if let Some(old) = &moved_from {
        info!(
            instance = %advertisement.instance,
            from = %old,
            to = %identity,
            "Backend moved to a new address"
        );
    } else if added {
        info!(
            instance = %advertisement.instance,
            candidate = %identity,
            "Discovered FalconEye backend"
        );
    }

    if added || moved_from.is_some() {
        on_update(registry.discovered());
    }
}

#[cfg(test)]
mod tests;
