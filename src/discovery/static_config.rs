//! Static candidate configuration.
//!
//! Turns configured fallback strings and the persisted manual override into
//! candidates. Bad entries are logged and skipped; they never abort startup.

use tracing::{info, warn};

use super::candidate::{Candidate, Origin};

/// Parse the configured static fallback list, preserving order.
///
/// Malformed entries and duplicate identities are skipped.
pub fn parse_fallbacks(entries: &[String]) -> Vec<Candidate> {
    let mut fallbacks: Vec<Candidate> = Vec::with_capacity(entries.len());

    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        match Candidate::parse(entry, Origin::StaticFallback) {
            Ok(candidate) => {
                if fallbacks.iter().any(|c| c.identity() == candidate.identity()) {
                    warn!(entry = %entry, "Duplicate static fallback, skipping");
                    continue;
                }
                fallbacks.push(candidate);
            }
            Err(e) => {
                warn!(entry = %entry, error = %e, "Invalid static fallback, skipping");
            }
        }
    }

    info!(count = fallbacks.len(), "Loaded static fallbacks");
    fallbacks
}

/// Interpret a persisted manual override value.
///
/// The value is honoured only if it begins with `http` and parses as an
/// http(s) URL with a host. Anything else is treated as absent.
pub fn parse_override(raw: Option<&str>) -> Option<Candidate> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;

    if !raw.starts_with("http") {
        warn!(value = %raw, "Ignoring manual override without http scheme");
        return None;
    }

    match Candidate::parse(raw, Origin::ManualOverride) {
        Ok(candidate) => Some(candidate),
        Err(e) => {
            warn!(value = %raw, error = %e, "Ignoring malformed manual override");
            None
        }
    }
}
