//! Controller test harness.
//!
//! Wires a [`Controller`] to a [`FakeRunner`] and a [`FakeBus`], with the
//! PID file placed in a private temporary directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use dhcpwatch_core::{Controller, HarnessConfig, LeaseTime};

use crate::bus::{FakeBus, FakeConnector};
use crate::error::{Result, TestError};
use crate::runner::FakeRunner;

/// Interface name used by harness-built controllers.
pub const TEST_INTERFACE: &str = "eth1";

/// Fakes plus the configuration that binds them together.
#[derive(Debug)]
pub struct DhcpTestHarness {
    /// Scripted process runner.
    pub runner: Arc<FakeRunner>,
    /// Scripted bus.
    pub bus: Arc<FakeBus>,
    /// Connector handing out `bus`.
    pub connector: FakeConnector,
    config: HarnessConfig,
    dir: TempDir,
}

impl DhcpTestHarness {
    /// Creates a harness builder.
    #[must_use]
    pub fn builder() -> DhcpTestHarnessBuilder {
        DhcpTestHarnessBuilder::default()
    }

    /// Creates a harness with default settings.
    ///
    /// # Errors
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Configuration handed to controllers.
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// PID file the fake daemon writes.
    pub fn pid_file(&self) -> &Path {
        &self.config.pid_file
    }

    /// Temporary run directory.
    pub fn run_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Builds a controller over the fakes.
    #[must_use]
    pub fn controller(&self) -> Controller {
        Controller::new(
            self.config.clone(),
            Arc::clone(&self.runner) as Arc<dyn dhcpwatch_core::ProcessRunner>,
            Arc::new(self.connector.clone()),
        )
    }

    /// Builds a controller and starts it.
    ///
    /// # Errors
    /// Returns a harness error if the harness has no interface, or any
    /// start error.
    pub async fn started_controller(&self) -> Result<Controller> {
        if self.config.interface.is_none() {
            return Err(TestError::harness(
                "cannot start a controller: harness built without an interface",
            ));
        }
        let mut controller = self.controller();
        controller.start(None, None).await?;
        Ok(controller)
    }
}

/// Builder for [`DhcpTestHarness`].
#[derive(Debug, Default)]
pub struct DhcpTestHarnessBuilder {
    lease_time: Option<LeaseTime>,
    interface: Option<String>,
    runner: Option<FakeRunner>,
    configure: Vec<fn(&mut HarnessConfig)>,
}

impl DhcpTestHarnessBuilder {
    /// Sets the lease time.
    #[must_use]
    pub const fn with_lease_time(mut self, lease_time: LeaseTime) -> Self {
        self.lease_time = Some(lease_time);
        self
    }

    /// Sets the interface (default [`TEST_INTERFACE`]).
    #[must_use]
    pub fn with_interface(mut self, ifname: impl Into<String>) -> Self {
        self.interface = Some(ifname.into());
        self
    }

    /// Leaves the interface unset.
    #[must_use]
    pub fn without_interface(mut self) -> Self {
        self.interface = Some(String::new());
        self
    }

    /// Uses a pre-scripted runner.
    #[must_use]
    pub fn with_runner(mut self, runner: FakeRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Applies an extra tweak to the configuration.
    #[must_use]
    pub fn configure(mut self, tweak: fn(&mut HarnessConfig)) -> Self {
        self.configure.push(tweak);
        self
    }

    /// Builds the harness.
    ///
    /// # Errors
    /// Returns an error if the temporary directory cannot be created.
    pub fn build(self) -> Result<DhcpTestHarness> {
        let dir = tempfile::tempdir()?;
        let pid_file: PathBuf = dir.path().join("dnsmasq.pid");

        let mut config = HarnessConfig::new("/usr/sbin/dnsmasq").with_pid_file(pid_file);
        match self.interface {
            Some(ifname) if ifname.is_empty() => config.interface = None,
            Some(ifname) => config.interface = Some(ifname),
            None => config.interface = Some(TEST_INTERFACE.to_string()),
        }
        config.lease_time = self.lease_time;
        for tweak in self.configure {
            tweak(&mut config);
        }

        let bus = Arc::new(FakeBus::new());
        Ok(DhcpTestHarness {
            runner: Arc::new(self.runner.unwrap_or_default()),
            connector: FakeConnector::new(Arc::clone(&bus)),
            bus,
            config,
            dir,
        })
    }
}
