//! Reachability probing.
//!
//! Walks an ordered candidate list and returns the first candidate whose
//! health endpoint answers `200`. Probing is strictly sequential with early
//! exit: worst-case latency is the per-candidate timeout times the number of
//! candidates, so callers run it on a worker task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::config::ProbeConfig;
use crate::discovery::{Candidate, Origin};

/// Error types for a single health check.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Invalid health URL for {candidate}: {message}")]
    InvalidUrl { candidate: String, message: String },

    #[error("Health check timed out for {candidate}")]
    Timeout { candidate: String },

    #[error("Health request to {candidate} failed: {message}")]
    Request { candidate: String, message: String },

    #[error("Unhealthy status {status} from {candidate}")]
    Unhealthy { candidate: String, status: u16 },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// A single-candidate health check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// `Ok(())` only if the candidate answered healthy within the timeout.
    async fn check(&self, candidate: &Candidate) -> Result<(), ProbeError>;
}

/// `GET {candidate}{health_path}` over reqwest.
///
/// Only a direct `200 OK` counts; redirects are not followed, caches and
/// pooled connections are bypassed, and the body is never read.
pub struct HttpHealthCheck {
    client: reqwest::Client,
    health_path: String,
}

impl HttpHealthCheck {
    pub fn new(config: &ProbeConfig) -> Result<Self, ProbeError> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self {
            client,
            health_path: config.health_path.clone(),
        })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, candidate: &Candidate) -> Result<(), ProbeError> {
        let identity = candidate.identity();
        let invalid = |message: String| ProbeError::InvalidUrl {
            candidate: identity.clone(),
            message,
        };
        let base = candidate.base_url().map_err(|e| invalid(e.to_string()))?;
        let url = base.join(&self.health_path).map_err(|e| invalid(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout {
                        candidate: identity.clone(),
                    }
                } else {
                    ProbeError::Request {
                        candidate: identity.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(ProbeError::Unhealthy {
                candidate: identity,
                status: response.status().as_u16(),
            })
        }
    }
}

/// Ordered, sequential-with-early-exit prober.
#[derive(Clone)]
pub struct Prober {
    health: Arc<dyn HealthCheck>,
}

impl Prober {
    pub fn new(health: Arc<dyn HealthCheck>) -> Self {
        Self { health }
    }

    /// Return the first candidate, in the given order, that passes its
    /// health check. Later candidates are never checked once one passes.
    ///
    /// A manual override short-circuits the scan and is accepted without a
    /// health check. `None` means nothing answered; that is the normal cloud
    /// relay signal, not an error.
    pub async fn probe(&self, candidates: &[Candidate]) -> Option<Candidate> {
        for candidate in candidates {
            if candidate.origin() == Origin::ManualOverride {
                info!(candidate = %candidate.identity(), "Using manual override");
                return Some(candidate.clone());
            }

            debug!(candidate = %candidate.identity(), "Checking candidate");
            match self.health.check(candidate).await {
                Ok(()) => {
                    info!(candidate = %candidate.identity(), origin = %candidate.origin(), "Candidate healthy");
                    return Some(candidate.clone());
                }
                Err(e) => {
                    debug!(candidate = %candidate.identity(), error = %e, "Candidate failed, trying next");
                }
            }
        }

        debug!(tried = candidates.len(), "No candidate answered");
        None
    }
}

/// Upper bound on one probe pass for the given candidate count.
pub fn worst_case_latency(timeout: Duration, candidates: usize) -> Duration {
    timeout.saturating_mul(u32::try_from(candidates).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests;
