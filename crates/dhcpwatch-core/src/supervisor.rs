//! dnsmasq process supervisor.
//!
//! Launches the DHCP server through the privilege helper, validates its
//! arguments with a dry run first, reads its PID back from the PID file and
//! terminates it with an optional SIGINT → SIGKILL escalation.
//!
//! ```text
//! start:  mkdir/chown run dir → dnsmasq --test → dnsmasq (stdin: enable-dbus) → read PID file
//! kill:   SIGINT → poll liveness every 100ms → SIGKILL after grace (if forced)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{HarnessConfig, KillConfig, LeaseTime, POOL_END, POOL_START, validate_interface};
use crate::error::{DhcpError, Result};
use crate::runner::{CommandSpec, ProcessRunner};
use crate::types::Signal;

/// Configuration fed to dnsmasq on stdin (`-C -`).
///
/// This is the config-file form of D-Bus support, which also enables the
/// lease signals; the `--enable-dbus` command line flag does not.
pub const STDIN_CONFIG: &str = "enable-dbus";

/// dnsmasq exit code for "address already in use".
const EXIT_ADDRESS_IN_USE: i32 = 2;

/// Supervises one dnsmasq instance on one interface.
pub struct ProcessSupervisor {
    daemon_path: PathBuf,
    interface: String,
    lease_time: Option<LeaseTime>,
    user: Option<String>,
    group: Option<String>,
    pid_file: PathBuf,
    privilege_helper: Vec<String>,
    kill: KillConfig,
    runner: Arc<dyn ProcessRunner>,
    /// PIDs to terminate on kill, without duplicates.
    tracked: Vec<u32>,
    /// PID read back from the PID file.
    daemon_pid: Option<u32>,
}

impl ProcessSupervisor {
    /// Creates a supervisor for `interface`.
    ///
    /// # Errors
    /// Returns an error if the interface name is invalid.
    pub fn new(
        config: &HarnessConfig,
        interface: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        let interface = interface.into();
        validate_interface(&interface)?;
        Ok(Self {
            daemon_path: config.daemon_path.clone(),
            interface,
            lease_time: config.lease_time,
            user: config.user.clone(),
            group: config.group.clone(),
            pid_file: config.pid_file.clone(),
            privilege_helper: config.privilege_helper.clone(),
            kill: config.kill.clone(),
            runner,
            tracked: Vec::new(),
            daemon_pid: None,
        })
    }

    /// Interface the daemon serves.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Overrides the lease duration.
    ///
    /// # Errors
    /// Returns [`DhcpError::AlreadyStarted`] once the daemon has been
    /// started, or a config error for leases below the daemon's minimum.
    pub fn set_lease_time(&mut self, lease_time: LeaseTime) -> Result<()> {
        if self.has_been_started() {
            return Err(DhcpError::AlreadyStarted);
        }
        lease_time.validate()?;
        self.lease_time = Some(lease_time);
        Ok(())
    }

    /// Lease duration override, if any.
    pub const fn lease_time(&self) -> Option<LeaseTime> {
        self.lease_time
    }

    /// Builds the daemon argument vector (without program or helper).
    pub fn daemon_args(&self) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.interface.clone()];
        if let Some(ref user) = self.user {
            args.extend(["-u".to_string(), user.clone()]);
        }
        if let Some(ref group) = self.group {
            args.extend(["-g".to_string(), group.clone()]);
        }
        args.push("--no-resolv".to_string());

        let mut range = format!("--dhcp-range=interface:{},{POOL_START},{POOL_END}", self.interface);
        if let Some(lease_time) = self.lease_time {
            range.push(',');
            range.push_str(&lease_time.to_string());
        }
        args.push(range);

        args.extend(
            ["--dhcp-authoritative", "--log-dhcp", "--leasefile-ro", "-C", "-", "-x"]
                .map(String::from),
        );
        args.push(self.pid_file.display().to_string());
        args
    }

    fn daemon_command(&self) -> CommandSpec {
        CommandSpec::privileged(&self.privilege_helper, self.daemon_path.display().to_string())
            .args(self.daemon_args())
    }

    fn privileged(&self, program: &str) -> CommandSpec {
        CommandSpec::privileged(&self.privilege_helper, program)
    }

    /// Starts the daemon and returns its PID.
    ///
    /// Tracked PIDs that already died (a daemon that exited without
    /// [`kill`](Self::kill)) are forgotten first, so a later `kill` never
    /// signals a recycled PID.
    ///
    /// # Errors
    /// - [`DhcpError::AlreadyStarted`] if the daemon is running
    /// - [`DhcpError::Ownership`] if the run directory cannot be handed over
    /// - [`DhcpError::InvalidConfig`] if the dry run rejects the arguments
    /// - [`DhcpError::AddressInUse`] / [`DhcpError::LaunchFailed`] on launch
    /// - [`DhcpError::EmptyPidFile`] if the daemon wrote no PID
    pub async fn start(&mut self) -> Result<u32> {
        if self.is_running() {
            return Err(DhcpError::AlreadyStarted);
        }
        self.forget_dead_pids();

        self.prepare_run_dir().await?;

        let command = self.daemon_command();

        let dry_run = command.clone().arg("--test");
        let code = self.runner.run(&dry_run).await?;
        if code != 0 {
            tracing::error!(command = %dry_run, code, "dnsmasq rejected its configuration");
            return Err(DhcpError::InvalidConfig { code });
        }

        let launch = command.stdin_text(STDIN_CONFIG);
        tracing::debug!(command = %launch, "launching dnsmasq");
        match self.runner.run(&launch).await? {
            0 => {}
            EXIT_ADDRESS_IN_USE => {
                tracing::error!(
                    interface = %self.interface,
                    "dnsmasq failed to bind DHCP server socket: address already in use"
                );
                return Err(DhcpError::AddressInUse);
            }
            code => {
                tracing::error!(interface = %self.interface, code, "dnsmasq failed to start");
                return Err(DhcpError::LaunchFailed { code });
            }
        }

        let pid = read_pid_file(&self.pid_file).await?;
        self.daemon_pid = Some(pid);
        self.add_tracked_pid(pid);
        tracing::info!(interface = %self.interface, pid, "dnsmasq started");
        Ok(pid)
    }

    /// Creates the PID file directory and hands it to the daemon user.
    async fn prepare_run_dir(&self) -> Result<()> {
        let Some(dir) = self.pid_file.parent() else {
            return Ok(());
        };
        let dir = dir.display().to_string();

        // Fails when the directory already exists, which is fine.
        let mkdir = self.privileged("mkdir").arg(&dir).quiet();
        let code = self.runner.run(&mkdir).await?;
        tracing::trace!(dir = %dir, code, "mkdir run directory");

        for (tool, owner) in [("chown", &self.user), ("chgrp", &self.group)] {
            let Some(owner) = owner else { continue };
            let cmd = self.privileged(tool).arg(owner).arg(&dir);
            let code = self.runner.run(&cmd).await?;
            if code != 0 {
                return Err(DhcpError::Ownership {
                    path: dir,
                    reason: format!("{tool} {owner} exited with {code}"),
                });
            }
        }
        Ok(())
    }

    fn forget_dead_pids(&mut self) {
        let runner = &self.runner;
        self.tracked.retain(|&pid| {
            let alive = runner.is_alive(pid);
            if !alive {
                tracing::debug!(pid, "forgetting dead PID");
            }
            alive
        });
        if self.daemon_pid.is_some_and(|pid| !self.tracked.contains(&pid)) {
            self.daemon_pid = None;
        }
    }

    /// Tracks `pid` for termination. Duplicates are ignored.
    pub fn add_tracked_pid(&mut self, pid: u32) {
        tracing::debug!(pid, "tracking PID");
        if !self.tracked.contains(&pid) {
            self.tracked.push(pid);
        }
    }

    /// PIDs that [`kill`](Self::kill) will terminate.
    pub fn tracked_pids(&self) -> &[u32] {
        &self.tracked
    }

    /// PID read from the PID file, while started.
    pub const fn daemon_pid(&self) -> Option<u32> {
        self.daemon_pid
    }

    /// Returns true once `start` has succeeded, until `kill`.
    pub const fn has_been_started(&self) -> bool {
        self.daemon_pid.is_some()
    }

    /// Returns true if started and every tracked PID is alive.
    pub fn is_running(&self) -> bool {
        self.has_been_started() && self.tracked.iter().all(|&pid| self.runner.is_alive(pid))
    }

    /// Sends `signal` to the most recently tracked PID.
    ///
    /// # Errors
    /// Returns [`DhcpError::NoTrackedPid`] if nothing is tracked.
    pub async fn signal_last_pid(&self, signal: Signal) -> Result<()> {
        let pid = *self.tracked.last().ok_or(DhcpError::NoTrackedPid)?;
        tracing::info!(pid, signal = %signal, "sending signal to dnsmasq");
        self.send_signal(pid, signal).await
    }

    async fn send_signal(&self, pid: u32, signal: Signal) -> Result<()> {
        let cmd = self
            .privileged("kill")
            .arg(format!("-{}", signal.name()))
            .arg(pid.to_string())
            .quiet();
        let code = self.runner.run(&cmd).await?;
        if code != 0 {
            // The process may already be gone.
            tracing::debug!(pid, signal = %signal, code, "kill reported failure");
        }
        Ok(())
    }

    /// Terminates every tracked PID using the configured policy.
    ///
    /// # Errors
    /// Returns the first runner error; tracking is cleared regardless.
    pub async fn kill(&mut self) -> Result<()> {
        let KillConfig {
            force,
            grace,
            poll_interval,
        } = self.kill.clone();
        self.kill_with(force, grace, poll_interval).await
    }

    /// Terminates every tracked PID.
    ///
    /// Each PID gets SIGINT; with `force`, a PID still alive after `grace`
    /// gets SIGKILL. Tracking is cleared unconditionally, so calling this
    /// twice is safe.
    ///
    /// # Errors
    /// Returns the first runner error.
    pub async fn kill_with(
        &mut self,
        force: bool,
        grace: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        let mut first_error = None;
        for pid in self.tracked.clone() {
            if let Err(e) = self.terminate(pid, force, grace, poll_interval).await {
                tracing::warn!(pid, error = %e, "failed to terminate tracked PID");
                first_error.get_or_insert(e);
            }
        }
        self.tracked.clear();
        self.daemon_pid = None;
        first_error.map_or(Ok(()), Err)
    }

    async fn terminate(
        &self,
        pid: u32,
        force: bool,
        grace: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        tracing::info!(pid, "sending SIGINT to dnsmasq");
        self.send_signal(pid, Signal::Int).await?;
        if !force {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + grace;
        while self.runner.is_alive(pid) {
            tokio::time::sleep(poll_interval).await;
            if tokio::time::Instant::now() >= deadline {
                tracing::info!(pid, "sending SIGKILL to dnsmasq");
                self.send_signal(pid, Signal::Kill).await?;
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("interface", &self.interface)
            .field("lease_time", &self.lease_time)
            .field("tracked", &self.tracked)
            .field("daemon_pid", &self.daemon_pid)
            .finish_non_exhaustive()
    }
}

/// Reads the daemon PID from the first line of `path`.
///
/// # Errors
/// Returns [`DhcpError::EmptyPidFile`] if the first line is blank.
pub async fn read_pid_file(path: &Path) -> Result<u32> {
    let content = tokio::fs::read_to_string(path).await?;
    let line = content.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Err(DhcpError::EmptyPidFile(path.display().to_string()));
    }
    line.parse().map_err(|e| {
        DhcpError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid PID {line:?} in {}: {e}", path.display()),
        ))
    })
}
