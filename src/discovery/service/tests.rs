use super::*;
use crate::test_utils::{ChannelBrowser, FixedResolver};
use std::net::SocketAddr;
use std::time::Duration;

const SERVICE_TYPE: &str = "_falconeye._tcp.local.";

struct Harness {
    browser: Arc<ChannelBrowser>,
    resolver: Arc<FixedResolver>,
    registry: Arc<CandidateRegistry>,
    discovery: ServiceDiscovery,
    updates: mpsc::UnboundedReceiver<CandidateSet>,
}

fn harness_with(resolver: FixedResolver) -> Harness {
    let browser = Arc::new(ChannelBrowser::new());
    let resolver = Arc::new(resolver);
    let registry = Arc::new(CandidateRegistry::default());
    let discovery = ServiceDiscovery::new(SERVICE_TYPE, browser.clone(), resolver.clone(), registry.clone());
    let (tx, updates) = mpsc::unbounded_channel();
    discovery.start(move |set| {
        let _ = tx.send(set);
    });
    Harness {
        browser,
        resolver,
        registry,
        discovery,
        updates,
    }
}

fn harness() -> Harness {
    harness_with(FixedResolver::new())
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

async fn next_update(rx: &mut mpsc::UnboundedReceiver<CandidateSet>) -> Option<CandidateSet> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
}

async fn no_update(rx: &mut mpsc::UnboundedReceiver<CandidateSet>) -> bool {
    tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err()
}

#[tokio::test]
async fn test_resolved_instance_becomes_candidate() {
    let mut h = harness();
    assert!(h.discovery.is_running());

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));

    let set = next_update(&mut h.updates).await.unwrap();
    assert_eq!(set.len(), 1);
    let candidate = set.get("http://192.168.1.40:3000").unwrap();
    assert_eq!(candidate.origin(), crate::discovery::Origin::Discovered);
    assert!(candidate.discovered_at().is_some());
    assert_eq!(h.registry.discovered().len(), 1);
}

#[tokio::test]
async fn test_updates_are_incremental() {
    let mut h = harness();

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));
    assert_eq!(next_update(&mut h.updates).await.unwrap().len(), 1);

    h.browser.advertise("cam-b", addr("192.168.1.41:3000"));
    assert_eq!(next_update(&mut h.updates).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_readvertised_instance_does_not_notify() {
    let mut h = harness();

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));
    assert!(next_update(&mut h.updates).await.is_some());

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));
    assert!(no_update(&mut h.updates).await);
    assert_eq!(h.registry.discovered().len(), 1);
}

#[tokio::test]
async fn test_unresolvable_instance_is_dropped() {
    let mut h = harness();
    h.resolver.fail_instance("cam-dead");

    h.browser.advertise("cam-dead", addr("192.168.1.50:3000"));
    assert!(no_update(&mut h.updates).await);
    assert!(h.registry.discovered().is_empty());
}

#[tokio::test]
async fn test_removed_instance_leaves_registry() {
    let mut h = harness();

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));
    h.browser.advertise("cam-b", addr("192.168.1.41:3000"));
    assert!(next_update(&mut h.updates).await.is_some());
    assert!(next_update(&mut h.updates).await.is_some());

    h.browser.withdraw("cam-a");
    let set = next_update(&mut h.updates).await.unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.contains_key("http://192.168.1.41:3000"));
}

#[tokio::test]
async fn test_removal_keeps_address_still_advertised_elsewhere() {
    let mut h = harness();

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));
    assert!(next_update(&mut h.updates).await.is_some());
    // Same backend under a second instance name.
    h.browser.advertise("cam-a-alias", addr("192.168.1.40:3000"));
    assert!(no_update(&mut h.updates).await);

    h.browser.withdraw("cam-a");
    assert!(no_update(&mut h.updates).await);
    assert_eq!(h.registry.discovered().len(), 1);
}

#[tokio::test]
async fn test_moved_instance_drops_old_address() {
    let mut h = harness();

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));
    assert!(next_update(&mut h.updates).await.is_some());

    h.browser.advertise("cam-a", addr("192.168.1.41:3000"));
    let set = next_update(&mut h.updates).await.unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.contains_key("http://192.168.1.41:3000"));

    h.browser.withdraw("cam-a");
    let set = next_update(&mut h.updates).await.unwrap();
    assert!(set.is_empty());
    assert!(h.registry.discovered().is_empty());
}

#[tokio::test]
async fn test_moved_instance_keeps_address_shared_with_alias() {
    let mut h = harness();

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));
    assert!(next_update(&mut h.updates).await.is_some());
    h.browser.advertise("cam-a-alias", addr("192.168.1.40:3000"));
    assert!(no_update(&mut h.updates).await);

    h.browser.advertise("cam-a", addr("192.168.1.41:3000"));
    let set = next_update(&mut h.updates).await.unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.contains_key("http://192.168.1.40:3000"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolution_racing_stop_never_survives() {
    for round in 0..50u16 {
        let h = harness();
        h.browser.advertise("cam-a", addr(&format!("192.168.1.{}:3000", round % 200 + 1)));
        for _ in 0..(round % 5) {
            tokio::task::yield_now().await;
        }

        h.discovery.stop();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(h.registry.discovered().is_empty(), "round {round}");
    }
}

#[tokio::test]
async fn test_stop_clears_and_cancels_resolution() {
    let mut h = harness_with(FixedResolver::with_delay(Duration::from_millis(200)));

    h.browser.advertise("cam-slow", addr("192.168.1.60:3000"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.discovery.stop();

    assert!(!h.discovery.is_running());
    assert_eq!(h.browser.stop_count(), 1);
    assert!(!h.browser.is_browsing());

    // The in-flight resolution never lands.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.registry.discovered().is_empty());
    assert!(h.updates.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_clears_discovered_candidates() {
    let mut h = harness();

    h.browser.advertise("cam-a", addr("192.168.1.40:3000"));
    assert!(next_update(&mut h.updates).await.is_some());

    h.discovery.stop();
    assert!(h.registry.discovered().is_empty());
}

#[tokio::test]
async fn test_start_is_idempotent_and_restartable() {
    let h = harness();

    h.discovery.start(|_| {});
    assert_eq!(h.browser.browse_count(), 1);

    h.discovery.stop();
    h.discovery.stop();
    assert_eq!(h.browser.stop_count(), 1);

    h.discovery.start(|_| {});
    assert!(h.discovery.is_running());
    assert_eq!(h.browser.browse_count(), 2);
}

#[tokio::test]
async fn test_browse_failure_leaves_discovery_stopped() {
    let browser = Arc::new(ChannelBrowser::new());
    browser.set_fail(true);
    let discovery = ServiceDiscovery::new(
        SERVICE_TYPE,
        browser.clone(),
        Arc::new(FixedResolver::new()),
        Arc::new(CandidateRegistry::default()),
    );

    discovery.start(|_| {});
    assert!(!discovery.is_running());
}
