use super::*;
use crate::test_utils::{ProbeOutcome, ScriptedHealthCheck};

fn fallback(url: &str) -> Candidate {
    Candidate::parse(url, Origin::StaticFallback).unwrap()
}

#[tokio::test]
async fn test_probe_returns_first_healthy_in_order() {
    let health = Arc::new(ScriptedHealthCheck::new());
    health.healthy("http://10.0.0.2:3000");
    health.healthy("http://10.0.0.3:3000");
    let prober = Prober::new(health.clone());

    let winner = prober
        .probe(&[
            fallback("http://10.0.0.1:3000"),
            fallback("http://10.0.0.2:3000"),
            fallback("http://10.0.0.3:3000"),
        ])
        .await
        .unwrap();

    assert_eq!(winner.identity(), "http://10.0.0.2:3000");
    // Early exit: the third candidate is never checked.
    assert_eq!(health.calls(), vec!["http://10.0.0.1:3000", "http://10.0.0.2:3000"]);
}

#[tokio::test]
async fn test_probe_none_when_all_fail() {
    let health = Arc::new(ScriptedHealthCheck::new());
    health.set("http://10.0.0.1:3000", ProbeOutcome::Status(503));
    let prober = Prober::new(health.clone());

    let winner = prober
        .probe(&[fallback("http://10.0.0.1:3000"), fallback("http://10.0.0.2:3000")])
        .await;

    assert!(winner.is_none());
    assert_eq!(health.call_count(), 2);
}

#[tokio::test]
async fn test_probe_empty_list() {
    let health = Arc::new(ScriptedHealthCheck::new());
    assert!(Prober::new(health.clone()).probe(&[]).await.is_none());
    assert_eq!(health.call_count(), 0);
}

#[tokio::test]
async fn test_manual_override_skips_health_check() {
    let health = Arc::new(ScriptedHealthCheck::new());
    let prober = Prober::new(health.clone());
    let manual = Candidate::parse("http://192.168.1.20:3000", Origin::ManualOverride).unwrap();

    let winner = prober.probe(&[manual.clone(), fallback("http://10.0.0.1:3000")]).await;

    assert_eq!(winner, Some(manual));
    assert_eq!(health.call_count(), 0);
}

#[test]
fn test_worst_case_latency() {
    assert_eq!(worst_case_latency(Duration::from_millis(1200), 3), Duration::from_millis(3600));
    assert_eq!(worst_case_latency(Duration::from_millis(1200), 0), Duration::ZERO);
}

#[test]
fn test_http_health_check_builds() {
    assert!(HttpHealthCheck::new(&ProbeConfig::default()).is_ok());
}
