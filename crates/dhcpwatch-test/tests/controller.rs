//! End-to-end controller scenarios over the scripted bus and runner.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use dhcpwatch_core::{DhcpError, ErrorKind, LeaseTime, Signal, StdinSource};
use dhcpwatch_test::{DhcpTestHarness, FAKE_DAEMON_PID, TestError, VersionReply};
use tokio::time::Instant;

const MAC: &str = "aa:bb:cc:dd:ee:ff";
const MAC_UPPER: &str = "AA:BB:CC:DD:EE:FF";
const IP: &str = "192.168.0.130";

/// Lets the bus event loop drain what was emitted.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn harness_120s() -> DhcpTestHarness {
    DhcpTestHarness::builder()
        .with_lease_time(LeaseTime::from_secs(120))
        .build()
        .unwrap()
}

// ── Lease tracking ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn lease_added_is_found_case_insensitively() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.lease_added(IP, MAC_UPPER);
    settle().await;

    assert_eq!(controller.find_ip_for_mac(MAC).unwrap().as_deref(), Some(IP));
    assert_eq!(controller.find_ip_for_mac(MAC_UPPER).unwrap().as_deref(), Some(IP));
}

#[tokio::test(start_paused = true)]
async fn lease_deleted_is_forgotten() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.lease_added(IP, MAC);
    harness.bus.lease_deleted(IP, MAC);
    settle().await;

    assert_eq!(controller.find_ip_for_mac(MAC).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn lease_updated_replaces_address() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.lease_added(IP, MAC);
    harness.bus.lease_updated("192.168.0.131", MAC);
    settle().await;

    assert_eq!(
        controller.find_ip_for_mac(MAC).unwrap().as_deref(),
        Some("192.168.0.131")
    );
    assert_eq!(controller.log_leases().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn deleting_unknown_lease_is_harmless() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.lease_added(IP, MAC);
    harness.bus.lease_deleted("192.168.0.140", "00:00:00:00:00:01");
    settle().await;

    let leases = controller.log_leases().unwrap();
    assert_eq!(leases.len(), 1);
    assert_eq!(leases[0].mac.as_str(), MAC);
    assert_eq!(leases[0].ip, IP);
}

#[tokio::test(start_paused = true)]
async fn reset_then_zero_wait_finds_nothing() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.lease_added(IP, MAC);
    settle().await;
    controller.reset_lease_database().unwrap();

    let err = controller
        .wait_lease(MAC, Some(Duration::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, DhcpError::NoLeaseFound { waited: None, .. }));

    let err = controller.wait_lease(MAC, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoLeaseFound);
}

#[tokio::test(start_paused = true)]
async fn leases_seen_before_monitoring_are_discarded() {
    let harness = harness_120s();
    let mut controller = harness.started_controller().await.unwrap();

    harness.bus.lease_added(IP, MAC);
    settle().await;
    controller.restart_monitoring_server(None).await.unwrap();

    assert_eq!(controller.find_ip_for_mac(MAC).unwrap(), None);
}

// ── Waiting ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn wait_lease_returns_as_soon_as_event_arrives() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    let bus = std::sync::Arc::clone(&harness.bus);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        bus.lease_added(IP, MAC_UPPER);
    });

    let started = Instant::now();
    let ip = controller
        .wait_lease(MAC, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(ip, IP);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3), "waited {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn wait_lease_ignores_other_hosts() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    let bus = std::sync::Arc::clone(&harness.bus);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        bus.lease_added("192.168.0.131", "11:22:33:44:55:66");
    });

    let started = Instant::now();
    let err = controller
        .wait_lease(MAC, Some(Duration::from_secs(3)))
        .await
        .unwrap_err();

    assert!(matches!(err, DhcpError::NoLeaseFound { waited: Some(w), .. } if w == Duration::from_secs(3)));
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(
        controller.find_ip_for_mac("11:22:33:44:55:66").unwrap().as_deref(),
        Some("192.168.0.131")
    );
}

#[tokio::test(start_paused = true)]
async fn wait_lease_returns_known_lease_immediately() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.lease_added(IP, MAC);
    settle().await;

    let started = Instant::now();
    let ip = controller
        .wait_lease(MAC, Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(ip, IP);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn check_on_uses_lease_time_default() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();
    let expected = LeaseTime::from_secs(120).renewal_timeout().unwrap();
    assert_eq!(expected, Duration::from_secs(66));

    let bus = std::sync::Arc::clone(&harness.bus);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        bus.lease_updated(IP, MAC);
    });

    let ip = controller.check_dhcp_client_on(MAC, None).await.unwrap();
    assert_eq!(ip, IP);
}

#[tokio::test(start_paused = true)]
async fn check_without_lease_time_needs_timeout() {
    let harness = DhcpTestHarness::new().unwrap();
    let controller = harness.started_controller().await.unwrap();

    let err = controller.check_dhcp_client_on(MAC, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoLeaseTime);

    let err = controller
        .check_dhcp_client_on(MAC, Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoLeaseFound);
}

#[tokio::test(start_paused = true)]
async fn check_off_passes_when_host_is_silent() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    controller
        .check_dhcp_client_off(MAC, Some(Duration::from_secs(2)))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn check_off_fails_when_host_has_lease() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.lease_added(IP, MAC);
    settle().await;

    let err = controller
        .check_dhcp_client_off(MAC, Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, DhcpError::LeaseStillPresent { ref ip, .. } if ip == IP));
}

// ── Lifecycle ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn start_launches_daemon_and_sends_hangup() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    assert!(controller.is_running());
    assert_eq!(controller.current_interface(), Some("eth1"));
    assert_eq!(harness.connector.connects(), 1);
    assert_eq!(controller.observer().unwrap().version(), "2.90");
    assert_eq!(
        controller.supervisor().unwrap().tracked_pids(),
        &[FAKE_DAEMON_PID]
    );
    assert_eq!(harness.runner.signals_sent(), vec![(Signal::Hup, FAKE_DAEMON_PID)]);

    let commands = harness.runner.commands();
    let daemon: Vec<_> = commands
        .iter()
        .filter(|c| c.program == "sudo" && c.has_arg("/usr/sbin/dnsmasq"))
        .collect();
    assert_eq!(daemon.len(), 2);
    assert!(daemon[0].has_arg("--test"));
    assert_eq!(daemon[0].stdin, StdinSource::Null);
    assert!(!daemon[1].has_arg("--test"));
    assert_eq!(daemon[1].stdin, StdinSource::Inline("enable-dbus".to_string()));
    assert!(daemon[1].has_arg("--dhcp-range=interface:eth1,192.168.0.128,192.168.0.254,120"));
}

#[tokio::test(start_paused = true)]
async fn start_with_explicit_interface_and_lease() {
    let harness = DhcpTestHarness::builder().without_interface().build().unwrap();
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoInterface);

    controller
        .start(Some("eth2"), Some(LeaseTime::from_secs(600)))
        .await
        .unwrap();
    assert_eq!(controller.current_interface(), Some("eth2"));
    assert_eq!(controller.lease_time(), Some(LeaseTime::from_secs(600)));
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected() {
    let harness = harness_120s();
    let mut controller = harness.started_controller().await.unwrap();

    let err = controller.start(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyStarted);
}

#[tokio::test(start_paused = true)]
async fn harness_without_interface_refuses_to_start() {
    let harness = DhcpTestHarness::builder().without_interface().build().unwrap();

    let err = harness.started_controller().await.unwrap_err();
    assert!(matches!(err, TestError::Harness(_)));
    assert!(err.to_string().contains("without an interface"));
    assert!(harness.runner.commands().is_empty());
    assert_eq!(harness.connector.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_while_only_observing_is_rejected() {
    let harness = harness_120s();
    let mut controller = harness.controller();
    controller.restart_monitoring_server(None).await.unwrap();

    let err = controller.start(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyStarted);
    assert_eq!(harness.connector.connects(), 1);
    assert!(controller.supervisor().is_none());
    assert!(controller.observer().is_some_and(|o| o.is_connected()));
    assert!(harness.runner.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn address_in_use_tracks_no_pid() {
    let harness = harness_120s();
    harness.runner.set_launch_code(2);
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AddressInUse);
    assert!(controller.supervisor().is_none());
    assert!(!controller.is_running());
    assert_eq!(harness.connector.connects(), 0);
    assert!(harness.runner.signals_sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_configuration_reports_dry_run_code() {
    let harness = harness_120s();
    harness.runner.set_dry_run_code(1);
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();
    assert!(matches!(err, DhcpError::InvalidConfig { code: 1 }));
    assert!(
        !harness
            .runner
            .commands()
            .iter()
            .any(|c| matches!(c.stdin, StdinSource::Inline(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn other_launch_failures_carry_exit_code() {
    let harness = harness_120s();
    harness.runner.set_launch_code(5);
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();
    assert!(matches!(err, DhcpError::LaunchFailed { code: 5 }));
}

#[tokio::test(start_paused = true)]
async fn run_directory_ownership_failure_is_fatal() {
    let harness = harness_120s();
    harness.runner.set_ownership_code(1);
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Ownership);
    assert!(!harness.runner.commands().iter().any(|c| c.has_arg("--test")));
}

#[tokio::test(start_paused = true)]
async fn empty_pid_file_fails_start() {
    let harness = harness_120s();
    harness.runner.set_empty_pid_file(true);
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyPidFile);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_daemon_and_disconnects() {
    let harness = harness_120s();
    let mut controller = harness.started_controller().await.unwrap();

    controller.stop().await.unwrap();

    assert!(!controller.is_running());
    assert!(controller.supervisor().is_none());
    assert!(!harness.runner.is_alive_pid(FAKE_DAEMON_PID));
    assert_eq!(
        harness.runner.signals_sent().last(),
        Some(&(Signal::Int, FAKE_DAEMON_PID))
    );
    assert_eq!(
        controller.find_ip_for_mac(MAC).unwrap_err().kind(),
        ErrorKind::NotConnected
    );

    // Stopping twice is a no-op.
    controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn forced_stop_escalates_after_grace() {
    let harness = DhcpTestHarness::builder()
        .with_lease_time(LeaseTime::from_secs(120))
        .configure(|config| config.kill.force = true)
        .build()
        .unwrap();
    harness.runner.ignore_interrupt(FAKE_DAEMON_PID);
    let mut controller = harness.started_controller().await.unwrap();

    let started = Instant::now();
    controller.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1), "escalated after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "escalated after {elapsed:?}");
    assert!(!harness.runner.is_alive_pid(FAKE_DAEMON_PID));
    let signals = harness.runner.signals_sent();
    assert_eq!(
        &signals[signals.len() - 2..],
        &[(Signal::Int, FAKE_DAEMON_PID), (Signal::Kill, FAKE_DAEMON_PID)]
    );
}

#[tokio::test(start_paused = true)]
async fn restart_runs_a_fresh_daemon() {
    let harness = harness_120s();
    let mut controller = harness.started_controller().await.unwrap();

    harness.runner.set_daemon_pid(5151);
    controller.restart().await.unwrap();

    assert_eq!(controller.supervisor().unwrap().daemon_pid(), Some(5151));
    assert_eq!(harness.connector.connects(), 2);
    assert!(controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn restart_monitoring_reconnects_and_hangs_up() {
    let harness = harness_120s();
    let mut controller = harness.started_controller().await.unwrap();

    controller.stop_monitoring_server().await;
    assert_eq!(
        controller.find_ip_for_mac(MAC).unwrap_err().kind(),
        ErrorKind::NotConnected
    );

    controller.restart_monitoring_server(None).await.unwrap();
    assert_eq!(harness.connector.connects(), 2);
    assert_eq!(
        harness.runner.signals_sent(),
        vec![(Signal::Hup, FAKE_DAEMON_PID), (Signal::Hup, FAKE_DAEMON_PID)]
    );
    assert_eq!(harness.bus.live_subscribers(), 1);
}

#[tokio::test(start_paused = true)]
async fn monitoring_an_unsupervised_server_sends_no_signal() {
    let harness = harness_120s();
    let mut controller = harness.controller();

    controller.restart_monitoring_server(Some("eth3")).await.unwrap();

    assert_eq!(controller.current_interface(), Some("eth3"));
    assert!(harness.runner.commands().is_empty());
    harness.bus.lease_added(IP, MAC);
    settle().await;
    assert_eq!(controller.find_ip_for_mac(MAC).unwrap().as_deref(), Some(IP));
}

#[tokio::test(start_paused = true)]
async fn queries_before_start_are_not_connected() {
    let harness = harness_120s();
    let controller = harness.controller();

    assert_eq!(
        controller.log_leases().unwrap_err().kind(),
        ErrorKind::NotConnected
    );
    assert_eq!(
        controller.reset_lease_database().unwrap_err().kind(),
        ErrorKind::NotConnected
    );
}

// ── Observer failures ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn missing_bus_owner_times_out() {
    let harness = harness_120s();
    harness.bus.set_owner_present(false);
    let mut controller = harness.controller();

    let started = Instant::now();
    let err = controller.start(None, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoBusOwner);
    assert!(started.elapsed() >= Duration::from_secs(5));
    // The daemon stays supervised so stop() can clean it up.
    assert!(controller.is_running());
    controller.stop().await.unwrap();
    assert!(!harness.runner.is_alive_pid(FAKE_DAEMON_PID));
}

#[tokio::test(start_paused = true)]
async fn late_bus_owner_is_awaited() {
    let harness = harness_120s();
    harness.bus.set_owner_after_polls(3);

    let controller = harness.started_controller().await.unwrap();
    assert!(controller.observer().is_some());
    assert!(harness.bus.owner_polls() >= 4);
}

#[tokio::test(start_paused = true)]
async fn hung_handshake_times_out() {
    let harness = harness_120s();
    harness.bus.set_version_reply(VersionReply::Hang);
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();

    assert!(matches!(err, DhcpError::HandshakeTimeout(t) if t == Duration::from_secs(4)));
    assert!(controller.observer().is_none());
    settle().await;
    assert_eq!(harness.bus.live_subscribers(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_handshake_is_reported() {
    let harness = harness_120s();
    harness
        .bus
        .set_version_reply(VersionReply::Fail("access denied".into()));
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandshakeError);
    assert!(err.to_string().contains("access denied"));
}

#[tokio::test(start_paused = true)]
async fn refused_bus_connection_is_reported() {
    let harness = harness_120s();
    harness.connector.set_refuse(true);
    let mut controller = harness.controller();

    let err = controller.start(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bus);
}

#[tokio::test(start_paused = true)]
async fn lost_owner_fails_queries() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.drop_owner();
    settle().await;

    let err = controller.find_ip_for_mac(MAC).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteLost);
    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn lost_owner_wakes_waiter() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    let bus = std::sync::Arc::clone(&harness.bus);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        bus.drop_owner();
    });

    let started = Instant::now();
    let err = controller
        .wait_lease(MAC, Some(Duration::from_secs(30)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteLost);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn closed_connection_counts_as_lost() {
    let harness = harness_120s();
    let controller = harness.started_controller().await.unwrap();

    harness.bus.disconnect();
    settle().await;

    assert_eq!(
        controller.log_leases().unwrap_err().kind(),
        ErrorKind::RemoteLost
    );
    let err = controller
        .check_dhcp_client_off(MAC, Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteLost);
}
