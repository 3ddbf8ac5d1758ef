//! Error types for dhcpwatch-core.
//!
//! Every failure is terminal for the operation that raised it. The only
//! condition swallowed inside the crate is deleting an absent lease, which
//! is logged by [`LeaseTable::remove`](crate::LeaseTable::remove).

use std::time::Duration;

use crate::types::MacAddress;

/// Result type alias for dhcpwatch operations.
pub type Result<T> = std::result::Result<T, DhcpError>;

/// Errors raised by the supervisor, the observer and the controller.
#[derive(Debug, thiserror::Error)]
pub enum DhcpError {
    /// The expected service never appeared on the bus.
    #[error("no owner for bus name {name} after {waited:?}")]
    NoBusOwner {
        /// Well-known bus name that was polled.
        name: String,
        /// How long we polled.
        waited: Duration,
    },

    /// The version handshake did not complete in time.
    #[error("version handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The version handshake returned an error.
    #[error("version handshake failed: {0}")]
    HandshakeError(String),

    /// The bus owner of the observed service disappeared.
    #[error("lost the DHCP server on bus name {0}")]
    RemoteLost(String),

    /// A supervisor or observer is already active.
    #[error("DHCP server already started")]
    AlreadyStarted,

    /// The daemon rejected its arguments during the validation run.
    #[error("invalid daemon configuration (validation exit code {code})")]
    InvalidConfig {
        /// Exit code of the validation run.
        code: i32,
    },

    /// The daemon could not bind its service port.
    #[error("DHCP server port already in use")]
    AddressInUse,

    /// The daemon exited with an unexpected code.
    #[error("DHCP server failed to start (exit code {code})")]
    LaunchFailed {
        /// Exit code of the launch.
        code: i32,
    },

    /// The PID file was present but empty.
    #[error("PID file {0} is empty")]
    EmptyPidFile(String),

    /// A signal was requested with no tracked child.
    #[error("no tracked child PID")]
    NoTrackedPid,

    /// No lease is known for the MAC address.
    #[error("no lease known for {mac}{}", waited_suffix(.waited))]
    NoLeaseFound {
        /// MAC address that was looked up.
        mac: MacAddress,
        /// `None` when no wait was allowed, otherwise the time waited.
        waited: Option<Duration>,
    },

    /// A lease was found where none was expected.
    #[error("existing lease for {mac}: {ip}")]
    LeaseStillPresent {
        /// MAC address that was checked.
        mac: MacAddress,
        /// IPv4 address it holds.
        ip: String,
    },

    /// The observer has been torn down.
    #[error("not connected to the DHCP server")]
    NotConnected,

    /// No interface was configured before starting.
    #[error("no network interface provided")]
    NoInterface,

    /// A default timeout was requested without a usable lease time.
    #[error("no lease time provided")]
    NoLeaseTime,

    /// The runtime directory could not be handed to the daemon user.
    #[error("failed to set ownership of {path}: {reason}")]
    Ownership {
        /// Directory being prepared.
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Signal name or number could not be parsed.
    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    /// Transport failure reported by the bus collaborator.
    #[error("bus error: {0}")]
    Bus(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn waited_suffix(waited: &Option<Duration>) -> String {
    waited.map_or_else(String::new, |w| format!(" after waiting {w:?}"))
}

/// Discriminant of a [`DhcpError`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorKind {
    NoBusOwner,
    HandshakeTimeout,
    HandshakeError,
    RemoteLost,
    AlreadyStarted,
    InvalidConfig,
    AddressInUse,
    LaunchFailed,
    EmptyPidFile,
    NoTrackedPid,
    NoLeaseFound,
    LeaseStillPresent,
    NotConnected,
    NoInterface,
    NoLeaseTime,
    Ownership,
    Config,
    UnknownSignal,
    Bus,
    Io,
}

impl DhcpError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a bus error.
    #[must_use]
    pub fn bus(msg: impl Into<String>) -> Self {
        Self::Bus(msg.into())
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoBusOwner { .. } => ErrorKind::NoBusOwner,
            Self::HandshakeTimeout(_) => ErrorKind::HandshakeTimeout,
            Self::HandshakeError(_) => ErrorKind::HandshakeError,
            Self::RemoteLost(_) => ErrorKind::RemoteLost,
            Self::AlreadyStarted => ErrorKind::AlreadyStarted,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::AddressInUse => ErrorKind::AddressInUse,
            Self::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            Self::EmptyPidFile(_) => ErrorKind::EmptyPidFile,
            Self::NoTrackedPid => ErrorKind::NoTrackedPid,
            Self::NoLeaseFound { .. } => ErrorKind::NoLeaseFound,
            Self::LeaseStillPresent { .. } => ErrorKind::LeaseStillPresent,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::NoInterface => ErrorKind::NoInterface,
            Self::NoLeaseTime => ErrorKind::NoLeaseTime,
            Self::Ownership { .. } => ErrorKind::Ownership,
            Self::Config(_) => ErrorKind::Config,
            Self::UnknownSignal(_) => ErrorKind::UnknownSignal,
            Self::Bus(_) => ErrorKind::Bus,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if the observer can no longer be trusted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::RemoteLost(_) | Self::NotConnected)
    }

    /// Returns true if this error only means "no lease for this host".
    #[must_use]
    pub const fn is_absent_lease(&self) -> bool {
        matches!(self, Self::NoLeaseFound { .. })
    }
}
