//! Controller facade.
//!
//! Composes a [`ProcessSupervisor`] and a [`ServerObserver`] behind the
//! operations a test driver uses: start and stop the server, query leases,
//! and wait for hosts to acquire or lose them.
//!
//! Only one DHCP server is supported at a time. dnsmasq does not say which
//! interface a lease signal belongs to, so two instances would feed the
//! same table.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::BusConnector;
use crate::config::{HarnessConfig, LeaseTime, validate_interface};
use crate::error::{DhcpError, Result};
use crate::observer::ServerObserver;
use crate::runner::ProcessRunner;
use crate::supervisor::ProcessSupervisor;
use crate::types::{Lease, LeaseLookup, MacAddress, Signal};

/// Start, stop, query and wait on one supervised DHCP server.
pub struct Controller {
    config: HarnessConfig,
    runner: Arc<dyn ProcessRunner>,
    connector: Arc<dyn BusConnector>,
    interface: Option<String>,
    lease_time: Option<LeaseTime>,
    supervisor: Option<ProcessSupervisor>,
    observer: Option<ServerObserver>,
}

impl Controller {
    /// Creates a controller. Nothing is started.
    #[must_use]
    pub fn new(
        config: HarnessConfig,
        runner: Arc<dyn ProcessRunner>,
        connector: Arc<dyn BusConnector>,
    ) -> Self {
        Self {
            interface: config.interface.clone(),
            lease_time: config.lease_time,
            config,
            runner,
            connector,
            supervisor: None,
            observer: None,
        }
    }

    /// Sets the interface used by the next start.
    ///
    /// # Errors
    /// Returns a config error for an invalid interface name.
    pub fn set_interface(&mut self, ifname: impl Into<String>) -> Result<()> {
        let ifname = ifname.into();
        validate_interface(&ifname)?;
        self.interface = Some(ifname);
        Ok(())
    }

    /// Interface configured for the server (it may not be started yet).
    pub fn current_interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Sets the lease duration used by the next start and by default
    /// check timeouts.
    ///
    /// # Errors
    /// Returns a config error for leases below the daemon's minimum.
    pub fn set_lease_time(&mut self, lease_time: LeaseTime) -> Result<()> {
        lease_time.validate()?;
        self.lease_time = Some(lease_time);
        Ok(())
    }

    /// Lease duration configured for the server.
    pub const fn lease_time(&self) -> Option<LeaseTime> {
        self.lease_time
    }

    /// The supervisor, while started.
    pub const fn supervisor(&self) -> Option<&ProcessSupervisor> {
        self.supervisor.as_ref()
    }

    /// The observer, while monitoring.
    pub const fn observer(&self) -> Option<&ServerObserver> {
        self.observer.as_ref()
    }

    /// Returns true if the server process is alive.
    pub fn is_running(&self) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(ProcessSupervisor::is_running)
    }

    /// Starts the DHCP server and begins monitoring its leases.
    ///
    /// If monitoring fails the server is left running; call
    /// [`stop`](Self::stop) to clean up.
    ///
    /// # Errors
    /// - [`DhcpError::AlreadyStarted`] if a server is already supervised or
    ///   observed
    /// - [`DhcpError::NoInterface`] if no interface was provided
    /// - any supervisor or observer startup error
    pub async fn start(&mut self, ifname: Option<&str>, lease_time: Option<LeaseTime>) -> Result<()> {
        if self.supervisor.is_some() || self.observer.is_some() {
            return Err(DhcpError::AlreadyStarted);
        }
        if let Some(ifname) = ifname {
            self.set_interface(ifname)?;
        }
        let interface = self.interface.clone().ok_or(DhcpError::NoInterface)?;
        if let Some(lease_time) = lease_time {
            self.set_lease_time(lease_time)?;
        }

        let mut supervisor =
            ProcessSupervisor::new(&self.config, interface, Arc::clone(&self.runner))?;
        if let Some(lease_time) = self.lease_time {
            supervisor.set_lease_time(lease_time)?;
        }
        supervisor.start().await?;
        self.supervisor = Some(supervisor);

        self.restart_monitoring_server(None).await
    }

    /// (Re)starts monitoring a server that is already running.
    ///
    /// When this controller supervises the server, it is sent SIGHUP so it
    /// re-announces its leases.
    ///
    /// # Errors
    /// Returns [`DhcpError::NoInterface`] or any observer startup error.
    pub async fn restart_monitoring_server(&mut self, ifname: Option<&str>) -> Result<()> {
        if let Some(ifname) = ifname {
            self.set_interface(ifname)?;
        }
        let interface = self.interface.clone().ok_or(DhcpError::NoInterface)?;

        self.stop_monitoring_server().await;

        let bus = self.connector.connect(&self.config.bus).await?;
        let observer = ServerObserver::connect(bus, self.config.bus.clone()).await?;
        self.observer = Some(observer);
        tracing::debug!(interface = %interface, "DHCP server is now being observed");

        if let Some(ref supervisor) = self.supervisor {
            supervisor.signal_last_pid(Signal::Hup).await?;
        }
        Ok(())
    }

    /// Stops monitoring leases without stopping the server.
    pub async fn stop_monitoring_server(&mut self) {
        if let Some(mut observer) = self.observer.take() {
            if let Err(e) = observer.exit().await {
                tracing::debug!(error = %e, "observer already stopped");
            }
            tracing::debug!(
                interface = self.interface.as_deref().unwrap_or_default(),
                "DHCP server not observed anymore"
            );
        }
    }

    /// Stops monitoring and terminates the server.
    ///
    /// # Errors
    /// Returns the first error from terminating tracked processes.
    pub async fn stop(&mut self) -> Result<()> {
        self.stop_monitoring_server().await;
        if let Some(mut supervisor) = self.supervisor.take() {
            supervisor.kill().await?;
            tracing::debug!(interface = supervisor.interface(), "DHCP server stopped");
        }
        Ok(())
    }

    /// Stops then starts again with the current settings.
    ///
    /// # Errors
    /// Same as [`stop`](Self::stop) and [`start`](Self::start).
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await?;
        self.start(None, None).await
    }

    fn live_observer(&self) -> Result<&ServerObserver> {
        self.observer.as_ref().ok_or(DhcpError::NotConnected)
    }

    /// Logs every known lease and returns them.
    ///
    /// # Errors
    /// Returns [`DhcpError::NotConnected`] when not monitoring.
    pub fn log_leases(&self) -> Result<Vec<Lease>> {
        let leases = self.live_observer()?.leases()?;
        let listing = leases
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(count = leases.len(), "current leases (hwaddr, ipv4addr): [{listing}]");
        Ok(leases)
    }

    /// IPv4 address allocated to `mac`, if any (case-insensitive).
    ///
    /// # Errors
    /// Returns [`DhcpError::NotConnected`] when not monitoring.
    pub fn find_ip_for_mac(&self, mac: &str) -> Result<Option<String>> {
        Ok(self.live_observer()?.get_ip(mac)?.into_option())
    }

    /// Forgets every lease learnt so far.
    ///
    /// # Errors
    /// Returns [`DhcpError::NotConnected`] when not monitoring.
    pub fn reset_lease_database(&self) -> Result<()> {
        self.live_observer()?.reset()
    }

    /// Returns the IPv4 address of `mac`, waiting up to `timeout` for it to
    /// get a lease.
    ///
    /// Returns immediately if a lease is already known. With no timeout (or
    /// a zero one) an unknown MAC fails right away.
    ///
    /// # Errors
    /// Returns [`DhcpError::NoLeaseFound`] if no lease arrives in time.
    pub async fn wait_lease(&self, mac: &str, timeout: Option<Duration>) -> Result<String> {
        let observer = self.live_observer()?;
        let mac = MacAddress::new(mac);

        if let LeaseLookup::Found(ip) = observer.get_ip(mac.clone())? {
            tracing::info!(mac = %mac, ip = %ip, "lease previously seen");
            return Ok(ip);
        }

        let Some(timeout) = timeout.filter(|t| !t.is_zero()) else {
            return Err(DhcpError::NoLeaseFound { mac, waited: None });
        };

        match observer.wait_for_lease(mac.clone(), timeout).await? {
            LeaseLookup::Found(ip) => {
                tracing::info!(mac = %mac, ip = %ip, "got lease");
                Ok(ip)
            }
            LeaseLookup::NotFound => Err(DhcpError::NoLeaseFound {
                mac,
                waited: Some(timeout),
            }),
        }
    }

    fn check_timeout(&self, timeout: Option<Duration>) -> Result<Duration> {
        match timeout {
            Some(timeout) => Ok(timeout),
            None => self.lease_time.ok_or(DhcpError::NoLeaseTime)?.renewal_timeout(),
        }
    }

    /// Checks that `mac` holds a lease or gets one within `timeout`.
    ///
    /// Without a timeout, waits half a lease plus a 10% margin. Call
    /// [`reset_lease_database`](Self::reset_lease_database) first to require
    /// fresh activity.
    ///
    /// # Errors
    /// Returns [`DhcpError::NoLeaseTime`] if no timeout can be derived, or
    /// [`DhcpError::NoLeaseFound`] if the host stays silent.
    pub async fn check_dhcp_client_on(&self, mac: &str, timeout: Option<Duration>) -> Result<String> {
        let timeout = self.check_timeout(timeout)?;
        self.wait_lease(mac, Some(timeout)).await
    }

    /// Checks that `mac` holds no lease and gets none within `timeout`.
    ///
    /// # Errors
    /// Returns [`DhcpError::LeaseStillPresent`] if a lease is found, or any
    /// error other than [`DhcpError::NoLeaseFound`] raised while waiting.
    pub async fn check_dhcp_client_off(&self, mac: &str, timeout: Option<Duration>) -> Result<()> {
        let timeout = self.check_timeout(timeout)?;
        match self.wait_lease(mac, Some(timeout)).await {
            Ok(ip) => Err(DhcpError::LeaseStillPresent {
                mac: MacAddress::new(mac),
                ip,
            }),
            Err(e) if e.is_absent_lease() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("interface", &self.interface)
            .field("lease_time", &self.lease_time)
            .field("supervisor", &self.supervisor)
            .field("observer", &self.observer)
            .finish_non_exhaustive()
    }
}
