//! Lease observer against the scripted bus.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use dhcpwatch_core::{BusConfig, ErrorKind, LeaseBus, LeaseLookup, ServerObserver};
use dhcpwatch_test::{FakeBus, VersionReply};
use tokio::time::Instant;

async fn connect(bus: &Arc<FakeBus>) -> ServerObserver {
    ServerObserver::connect(Arc::clone(bus) as Arc<dyn LeaseBus>, BusConfig::default())
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn connect_reports_version_and_starts_empty() {
    let bus = Arc::new(FakeBus::new());
    bus.set_version_reply(VersionReply::Version("2.89".into()));
    let observer = connect(&bus).await;

    assert_eq!(observer.version(), "2.89");
    assert!(observer.is_connected());
    assert!(!observer.is_lost());
    assert!(observer.leases().unwrap().is_empty());
    assert_eq!(bus.version_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn watch_targets_a_single_host() {
    let bus = Arc::new(FakeBus::new());
    let observer = connect(&bus).await;

    observer.watch("aa:aa:aa:aa:aa:aa").unwrap();
    observer.watch("cc:cc:cc:cc:cc:cc").unwrap();
    bus.lease_added("192.168.0.130", "aa:aa:aa:aa:aa:aa");

    assert!(!observer.wait(Duration::from_secs(1)).await.unwrap());

    bus.lease_added("192.168.0.131", "CC:CC:CC:CC:CC:CC");
    assert!(observer.wait(Duration::from_secs(1)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn wait_returns_on_time_without_event() {
    let bus = Arc::new(FakeBus::new());
    let observer = connect(&bus).await;
    observer.watch("aa:aa:aa:aa:aa:aa").unwrap();

    let started = Instant::now();
    assert!(!observer.wait(Duration::from_millis(1500)).await.unwrap());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1500));
    assert!(elapsed < Duration::from_millis(1600));
}

#[tokio::test(start_paused = true)]
async fn wait_for_lease_sees_lease_from_event() {
    let bus = Arc::new(FakeBus::new());
    let observer = connect(&bus).await;

    let emitter = Arc::clone(&bus);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        emitter.lease_added("192.168.0.200", "de:ad:be:ef:00:01");
    });

    let found = observer
        .wait_for_lease("DE:AD:BE:EF:00:01", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(found, LeaseLookup::Found("192.168.0.200".to_string()));
}

#[tokio::test(start_paused = true)]
async fn wait_for_lease_with_zero_timeout_only_looks() {
    let bus = Arc::new(FakeBus::new());
    let observer = connect(&bus).await;

    let started = Instant::now();
    let found = observer
        .wait_for_lease("de:ad:be:ef:00:01", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(found, LeaseLookup::NotFound);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn exit_releases_subscription() {
    let bus = Arc::new(FakeBus::new());
    let mut observer = connect(&bus).await;
    assert_eq!(bus.live_subscribers(), 1);

    observer.exit().await.unwrap();

    assert!(!observer.is_connected());
    assert_eq!(bus.live_subscribers(), 0);
    assert_eq!(
        observer.get_ip("aa:aa:aa:aa:aa:aa").unwrap_err().kind(),
        ErrorKind::NotConnected
    );
    assert_eq!(observer.exit().await.unwrap_err().kind(), ErrorKind::NotConnected);
}

#[tokio::test(start_paused = true)]
async fn lost_owner_is_sticky_across_rewatch() {
    let bus = Arc::new(FakeBus::new());
    let observer = connect(&bus).await;

    bus.drop_owner();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(observer.is_lost());
    assert_eq!(
        observer.watch("aa:aa:aa:aa:aa:aa").unwrap_err().kind(),
        ErrorKind::RemoteLost
    );
    assert_eq!(
        observer.wait(Duration::from_secs(1)).await.unwrap_err().kind(),
        ErrorKind::RemoteLost
    );
}

#[tokio::test(start_paused = true)]
async fn owner_handover_is_not_a_loss() {
    let bus = Arc::new(FakeBus::new());
    let observer = connect(&bus).await;

    bus.emit(dhcpwatch_core::BusEvent::OwnerChanged(Some(":1.42".into())));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!observer.is_lost());
    assert!(observer.leases().is_ok());
}

#[tokio::test(start_paused = true)]
async fn absent_owner_fails_after_owner_timeout() {
    let bus = Arc::new(FakeBus::new());
    bus.set_owner_present(false);
    let config = BusConfig {
        owner_timeout: Duration::from_secs(2),
        ..BusConfig::default()
    };

    let started = Instant::now();
    let err = ServerObserver::connect(Arc::clone(&bus) as Arc<dyn LeaseBus>, config)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoBusOwner);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(bus.live_subscribers(), 0);
}
