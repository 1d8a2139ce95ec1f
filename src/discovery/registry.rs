//! Candidate registry - thread-safe storage of every known backend address.
//!
//! Holds three groups: candidates found by service discovery, the static
//! fallback list from configuration, and an optional manual override. All
//! three sit behind one lock so a snapshot never mixes old and new state.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};

use super::candidate::Candidate;

/// Discovered candidates keyed by identity.
pub type CandidateSet = HashMap<String, Candidate>;

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub discovered: CandidateSet,
    pub static_fallback: Vec<Candidate>,
    pub manual_override: Option<Candidate>,
}

impl RegistrySnapshot {
    /// Evaluation order for the prober.
    ///
    /// A manual override, when present, is the only candidate. Otherwise
    /// discovered candidates come first (most recently discovered first),
    /// followed by static fallbacks in configured order. A static entry whose
    /// identity was also discovered is not repeated.
    pub fn probe_order(&self) -> Vec<Candidate> {
        if let Some(manual) = &self.manual_override {
            return vec![manual.clone()];
        }

        let mut discovered: Vec<Candidate> = self.discovered.values().cloned().collect();
        discovered.sort_by(|a, b| {
            b.discovered_at()
                .cmp(&a.discovered_at())
                .then_with(|| a.identity().cmp(&b.identity()))
        });

        let mut order = discovered;
        for fallback in &self.static_fallback {
            let identity = fallback.identity();
            if !order.iter().any(|c| c.identity() == identity) {
                order.push(fallback.clone());
            }
        }
        order
    }

    /// Total number of candidates, override included.
    pub fn len(&self) -> usize {
        self.discovered.len() + self.static_fallback.len() + usize::from(self.manual_override.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    discovered: CandidateSet,
    static_fallback: Vec<Candidate>,
    manual_override: Option<Candidate>,
}

/// Thread-safe candidate registry.
///
/// Mutated from discovery tasks and the selector; read by the selector.
/// Critical sections never await, so a plain `RwLock` is enough and callers
/// on callback threads are never parked for long.
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    state: RwLock<RegistryState>,
}

impl CandidateRegistry {
    /// Create a registry seeded with static fallbacks.
    pub fn new(static_fallback: Vec<Candidate>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                static_fallback,
                ..Default::default()
            }),
        }
    }

    /// Add or refresh a discovered candidate.
    ///
    /// Returns `true` if the identity was not present before.
    pub fn add_discovered(&self, candidate: Candidate) -> bool {
        let identity = candidate.identity();
        let mut state = self.write();
        let is_new = state.discovered.insert(identity.clone(), candidate).is_none();
        if is_new {
            info!(candidate = %identity, "Registered discovered candidate");
        } else {
            debug!(candidate = %identity, "Refreshed discovered candidate");
        }
        is_new
    }

    /// Replace the whole discovered set.
    pub fn replace_discovered(&self, set: CandidateSet) {
        let mut state = self.write();
        debug!(
            before = state.discovered.len(),
            after = set.len(),
            "Replacing discovered candidates"
        );
        state.discovered = set;
    }

    /// Remove one discovered candidate. Returns `true` if it was present.
    pub fn remove_discovered(&self, identity: &str) -> bool {
        let removed = self.write().discovered.remove(identity).is_some();
        if removed {
            info!(candidate = %identity, "Removed discovered candidate");
        }
        removed
    }

    /// Drop every discovered candidate.
    pub fn clear_discovered(&self) {
        let mut state = self.write();
        if !state.discovered.is_empty() {
            info!(count = state.discovered.len(), "Clearing discovered candidates");
        }
        state.discovered.clear();
    }

    /// Install or remove the manual override.
    pub fn set_manual_override(&self, candidate: Option<Candidate>) {
        let mut state = self.write();
        match &candidate {
            Some(c) => info!(candidate = %c.identity(), "Manual override installed"),
            None if state.manual_override.is_some() => info!("Manual override removed"),
            None => {}
        }
        state.manual_override = candidate;
    }

    /// Current discovered set.
    pub fn discovered(&self) -> CandidateSet {
        self.read().discovered.clone()
    }

    /// Consistent copy of all three groups.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read();
        RegistrySnapshot {
            discovered: state.discovered.clone(),
            static_fallback: state.static_fallback.clone(),
            manual_override: state.manual_override.clone(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        // A panicking writer cannot leave the maps half-updated, so poison is ignored.
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
