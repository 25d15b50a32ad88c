//! Registry behavior: client sharing, reference counting, periodic
//! announces, teardown.

mod harness;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use harness::{init_tracing, test_config, MemoryDialer, MockConnector};
use tokio_test::assert_ok;
use swarmlink::signaling::protocol::AnnounceRequest;
use swarmlink::{Error, TrackerRegistry};

#[tokio::test]
async fn concurrent_acquires_share_one_client() {
    init_tracing();
    let engine = Arc::new(MockConnector::default());
    let (dialer, mut accepted) = MemoryDialer::new(16);
    let (registry, _listener) =
        TrackerRegistry::with_parts(test_config(1), engine, dialer.clone()).unwrap();

    let mut leases = Vec::new();
    let acquiring: Vec<_> = (0..5)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire("ws://tracker.test").await })
        })
        .collect();
    for task in acquiring {
        leases.push(task.await.unwrap().unwrap());
    }

    assert_eq!(registry.tracker_count().await, 1);

    // the one shared client dialed once and announced once
    let mut end = accepted.recv().await.unwrap();
    let request = AnnounceRequest::from_json(&end.next_frame().await).unwrap();
    assert_eq!(request.offers.len(), 1);
    assert_eq!(dialer.dial_count(), 1);

    // releases are idempotent against the count, and the last one closes
    for lease in leases {
        registry.release(lease).await;
    }
    assert_eq!(registry.tracker_count().await, 0);
    end.wait_closed().await;
}

#[tokio::test]
async fn different_urls_get_different_clients() {
    init_tracing();
    let engine = Arc::new(MockConnector::default());
    let (dialer, _accepted) = MemoryDialer::new(16);
    let (registry, _listener) =
        TrackerRegistry::with_parts(test_config(1), engine, dialer.clone()).unwrap();

    let a = registry.acquire("ws://a.test").await.unwrap();
    let b = registry.acquire("ws://b.test").await.unwrap();
    assert_eq!(registry.tracker_count().await, 2);

    registry.release(a).await;
    assert_eq!(registry.tracker_count().await, 1);
    registry.release(b).await;
    assert_eq!(registry.tracker_count().await, 0);
}

#[tokio::test]
async fn start_acquires_all_configured_trackers() {
    init_tracing();
    let engine = Arc::new(MockConnector::default());
    let (dialer, mut accepted) = MemoryDialer::new(16);
    let mut config = test_config(1);
    config.trackers = vec![
        "ws://one.test".to_string(),
        "ws://two.test".to_string(),
    ];
    let (registry, _listener) =
        TrackerRegistry::with_parts(config, engine, dialer.clone()).unwrap();

    tokio_test::assert_ok!(registry.start().await);
    assert_eq!(registry.tracker_count().await, 2);

    // both clients connect and announce
    let mut end_a = accepted.recv().await.unwrap();
    let mut end_b = accepted.recv().await.unwrap();
    let _ = end_a.next_frame().await;
    let _ = end_b.next_frame().await;

    registry.shutdown().await;
    assert_eq!(registry.tracker_count().await, 0);
    end_a.wait_closed().await;
    end_b.wait_closed().await;

    // the registry stays closed
    let result = registry.acquire("ws://one.test").await;
    assert!(matches!(result, Err(Error::Closed)));
}

#[tokio::test]
async fn periodic_announces_keep_flowing() {
    init_tracing();
    let engine = Arc::new(MockConnector::default());
    let (dialer, mut accepted) = MemoryDialer::new(16);
    let mut config = test_config(1);
    config.announce_interval = Duration::from_millis(50);
    let (registry, _listener) =
        TrackerRegistry::with_parts(config, engine.clone(), dialer).unwrap();

    tokio_test::assert_ok!(registry.start().await);
    let mut end = accepted.recv().await.unwrap();

    // initial announce plus at least two ticker rounds
    for _ in 0..3 {
        let request = AnnounceRequest::from_json(&end.next_frame().await).unwrap();
        assert_eq!(request.offers.len(), 1);
    }
    assert!(engine.offers_created.load(Ordering::SeqCst) >= 3);

    registry.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_the_announcer() {
    init_tracing();
    let engine = Arc::new(MockConnector::default());
    let (dialer, mut accepted) = MemoryDialer::new(16);
    let mut config = test_config(1);
    config.announce_interval = Duration::from_millis(30);
    let (registry, _listener) = TrackerRegistry::with_parts(config, engine, dialer).unwrap();

    registry.start().await.unwrap();
    let mut end = accepted.recv().await.unwrap();
    let _ = end.next_frame().await;

    registry.shutdown().await;

    // whatever was in flight drains; after that, silence
    while tokio::time::timeout(Duration::from_millis(120), end.outbound.recv())
        .await
        .unwrap_or(None)
        .is_some()
    {}
    let after = tokio::time::timeout(Duration::from_millis(150), end.outbound.recv()).await;
    assert!(matches!(after, Ok(None) | Err(_)));
}
