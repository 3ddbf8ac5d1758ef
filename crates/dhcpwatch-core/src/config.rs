//! Harness configuration.
//!
//! Configuration is validated at load time, with defaults matching a
//! Debian dnsmasq install.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DhcpError, Result};

/// First address of the private pool handed out by the daemon.
pub const POOL_START: &str = "192.168.0.128";

/// Last address of the private pool handed out by the daemon.
pub const POOL_END: &str = "192.168.0.254";

/// Shortest lease dnsmasq accepts.
pub const MIN_LEASE_TIME: Duration = Duration::from_secs(120);

/// Margin allowed for a renewal to arrive late, relative to the half-lease
/// renewal point.
pub const LEASE_RENEW_MARGIN: f64 = 0.1;

/// Top-level configuration for the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Path to the DHCP server executable.
    #[serde(default = "default_daemon_path")]
    pub daemon_path: PathBuf,

    /// Network interface the server binds to.
    #[serde(default)]
    pub interface: Option<String>,

    /// Lease duration override.
    #[serde(default)]
    pub lease_time: Option<LeaseTime>,

    /// User the daemon drops privileges to.
    #[serde(default = "default_user")]
    pub user: Option<String>,

    /// Group the daemon drops privileges to.
    #[serde(default = "default_group")]
    pub group: Option<String>,

    /// PID file written by the daemon.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Command prefix used to run privileged commands (empty: none).
    #[serde(default = "default_privilege_helper")]
    pub privilege_helper: Vec<String>,

    /// Bus observation settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Termination settings.
    #[serde(default)]
    pub kill: KillConfig,
}

fn default_daemon_path() -> PathBuf {
    PathBuf::from("/usr/sbin/dnsmasq")
}

#[allow(clippy::unnecessary_wraps)]
fn default_user() -> Option<String> {
    Some("dnsmasq".to_string())
}

#[allow(clippy::unnecessary_wraps)]
fn default_group() -> Option<String> {
    Some("nogroup".to_string())
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/dnsmasq/dnsmasq.pid")
}

fn default_privilege_helper() -> Vec<String> {
    vec!["sudo".to_string()]
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            daemon_path: default_daemon_path(),
            interface: None,
            lease_time: None,
            user: default_user(),
            group: default_group(),
            pid_file: default_pid_file(),
            privilege_helper: default_privilege_helper(),
            bus: BusConfig::default(),
            kill: KillConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Creates a configuration for the given daemon executable.
    #[must_use]
    pub fn new(daemon_path: impl Into<PathBuf>) -> Self {
        Self {
            daemon_path: daemon_path.into(),
            ..Self::default()
        }
    }

    /// Sets the interface.
    #[must_use]
    pub fn with_interface(mut self, ifname: impl Into<String>) -> Self {
        self.interface = Some(ifname.into());
        self
    }

    /// Sets the lease time.
    #[must_use]
    pub const fn with_lease_time(mut self, lease_time: LeaseTime) -> Self {
        self.lease_time = Some(lease_time);
        self
    }

    /// Sets the PID file path.
    #[must_use]
    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = path.into();
        self
    }

    /// Sets the privilege helper prefix.
    #[must_use]
    pub fn with_privilege_helper<I, S>(mut self, helper: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privilege_helper = helper.into_iter().map(Into::into).collect();
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.daemon_path.as_os_str().is_empty() {
            return Err(DhcpError::config("daemon_path cannot be empty"));
        }
        if self.pid_file.as_os_str().is_empty() {
            return Err(DhcpError::config("pid_file cannot be empty"));
        }
        if self.pid_file.parent().is_none() {
            return Err(DhcpError::config("pid_file must have a parent directory"));
        }
        if let Some(ref ifname) = self.interface {
            validate_interface(ifname)?;
        }
        if let Some(lease_time) = self.lease_time {
            lease_time.validate()?;
        }
        self.bus.validate()?;
        self.kill.validate()?;
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DhcpError::config(format!("failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text cannot be parsed or is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DhcpError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Checks an interface name the way the kernel would accept it.
pub(crate) fn validate_interface(ifname: &str) -> Result<()> {
    if ifname.is_empty() {
        return Err(DhcpError::config("interface cannot be empty"));
    }
    // IFNAMSIZ is 16 including the terminating NUL
    if ifname.len() > 15 {
        return Err(DhcpError::config(format!(
            "interface name too long: {ifname}"
        )));
    }
    if ifname
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == ',')
    {
        return Err(DhcpError::config(format!(
            "invalid interface name: {ifname}"
        )));
    }
    Ok(())
}

/// Settings for the bus observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Well-known name owned by the daemon.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Object path exposing the lease signals.
    #[serde(default = "default_object_path")]
    pub object_path: String,

    /// Interface of the lease signals and `GetVersion`.
    #[serde(default = "default_service_name")]
    pub interface: String,

    /// How long to wait for the service name to get an owner.
    #[serde(default = "default_owner_timeout", with = "humantime_serde")]
    pub owner_timeout: Duration,

    /// Polling period while waiting for an owner.
    #[serde(default = "default_owner_poll_interval", with = "humantime_serde")]
    pub owner_poll_interval: Duration,

    /// How long the version handshake may take.
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: Duration,

    /// How long `exit()` waits for the event loop before aborting it.
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

fn default_service_name() -> String {
    "uk.org.thekelleys.dnsmasq".to_string()
}

fn default_object_path() -> String {
    "/uk/org/thekelleys/dnsmasq".to_string()
}

const fn default_owner_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_owner_poll_interval() -> Duration {
    Duration::from_millis(200)
}

const fn default_handshake_timeout() -> Duration {
    Duration::from_secs(4)
}

const fn default_shutdown_grace() -> Duration {
    Duration::from_secs(1)
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            object_path: default_object_path(),
            interface: default_service_name(),
            owner_timeout: default_owner_timeout(),
            owner_poll_interval: default_owner_poll_interval(),
            handshake_timeout: default_handshake_timeout(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl BusConfig {
    /// Validates bus settings.
    ///
    /// # Errors
    /// Returns an error if a name is empty or a period is zero.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() || self.interface.is_empty() {
            return Err(DhcpError::config("bus names cannot be empty"));
        }
        if !self.object_path.starts_with('/') {
            return Err(DhcpError::config("object_path must start with '/'"));
        }
        if self.owner_poll_interval.is_zero() {
            return Err(DhcpError::config("owner_poll_interval must be > 0"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(DhcpError::config("handshake_timeout must be > 0"));
        }
        Ok(())
    }
}

/// Settings for terminating tracked processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillConfig {
    /// Escalate to SIGKILL when a process outlives the grace period.
    #[serde(default)]
    pub force: bool,

    /// How long to wait after SIGINT before escalating.
    #[serde(default = "default_kill_grace", with = "humantime_serde")]
    pub grace: Duration,

    /// Liveness polling period during the grace period.
    #[serde(default = "default_kill_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

const fn default_kill_grace() -> Duration {
    Duration::from_secs(1)
}

const fn default_kill_poll_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for KillConfig {
    fn default() -> Self {
        Self {
            force: false,
            grace: default_kill_grace(),
            poll_interval: default_kill_poll_interval(),
        }
    }
}

impl KillConfig {
    /// Validates termination settings.
    ///
    /// # Errors
    /// Returns an error if the poll interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(DhcpError::config("kill poll_interval must be > 0"));
        }
        Ok(())
    }
}

/// Lease duration in dnsmasq syntax: `45m`, `1h`, `120` or `infinite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LeaseTime {
    /// Finite duration, stored in whole seconds.
    Finite(u64),
    /// Leases never expire.
    Infinite,
}

impl LeaseTime {
    /// Creates a finite lease time.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self::Finite(secs)
    }

    /// Returns the duration, or `None` for infinite leases.
    #[must_use]
    pub const fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Finite(secs) => Some(Duration::from_secs(*secs)),
            Self::Infinite => None,
        }
    }

    /// Checks the daemon's lower bound.
    ///
    /// # Errors
    /// Returns an error for finite leases shorter than two minutes.
    pub fn validate(&self) -> Result<()> {
        match self.as_duration() {
            Some(d) if d < MIN_LEASE_TIME => Err(DhcpError::config(format!(
                "lease time {self} is shorter than the minimum of {}",
                humantime::format_duration(MIN_LEASE_TIME)
            ))),
            _ => Ok(()),
        }
    }

    /// Default wait for a renewal: half the lease plus a margin.
    ///
    /// # Errors
    /// Returns [`DhcpError::NoLeaseTime`] for infinite leases.
    pub fn renewal_timeout(&self) -> Result<Duration> {
        let secs = match self {
            Self::Finite(secs) => *secs,
            Self::Infinite => return Err(DhcpError::NoLeaseTime),
        };
        let timeout = ((1.0 + LEASE_RENEW_MARGIN) * secs as f64 / 2.0).floor();
        Ok(Duration::from_secs(timeout as u64))
    }
}

impl fmt::Display for LeaseTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(secs) => write!(f, "{secs}"),
            Self::Infinite => f.write_str("infinite"),
        }
    }
}

impl FromStr for LeaseTime {
    type Err = DhcpError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("infinite") {
            return Ok(Self::Infinite);
        }
        let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
            Some(idx) => s.split_at(idx),
            None => (s, ""),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| DhcpError::config(format!("invalid lease time: {s:?}")))?;
        let factor = match unit.to_ascii_lowercase().as_str() {
            "" | "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            "w" => 7 * 24 * 60 * 60,
            _ => return Err(DhcpError::config(format!("invalid lease time unit: {s:?}"))),
        };
        value
            .checked_mul(factor)
            .map(Self::Finite)
            .ok_or_else(|| DhcpError::config(format!("lease time overflows: {s:?}")))
    }
}

impl TryFrom<String> for LeaseTime {
    type Error = DhcpError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<LeaseTime> for String {
    fn from(lease_time: LeaseTime) -> Self {
        lease_time.to_string()
    }
}
