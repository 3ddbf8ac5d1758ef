//! Core types shared by the lease table, the observer and the supervisor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DhcpError;

/// Hardware address, normalized to lowercase.
///
/// The daemon announces MAC addresses in whatever case its clients used;
/// every lookup and every watch goes through this type so matching is
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Creates a normalized MAC address.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    /// Returns the normalized string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MacAddress {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for MacAddress {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single lease: which IPv4 address a hardware address currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lease {
    /// Hardware address (unique key in the table).
    pub mac: MacAddress,
    /// IPv4 address as announced by the daemon.
    pub ip: String,
}

impl Lease {
    /// Creates a lease.
    #[must_use]
    pub fn new(mac: impl Into<MacAddress>, ip: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            ip: ip.into(),
        }
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.mac, self.ip)
    }
}

/// Outcome of a lease lookup.
///
/// "No lease yet" is an ordinary answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseLookup {
    /// The MAC address holds this IPv4 address.
    Found(String),
    /// The MAC address holds no lease.
    NotFound,
}

impl LeaseLookup {
    /// Returns true if a lease was found.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Converts into an `Option` of the IPv4 address.
    #[must_use]
    pub fn into_option(self) -> Option<String> {
        match self {
            Self::Found(ip) => Some(ip),
            Self::NotFound => None,
        }
    }
}

impl From<Option<String>> for LeaseLookup {
    fn from(ip: Option<String>) -> Self {
        ip.map_or(Self::NotFound, Self::Found)
    }
}

/// Unix-style signals sent to tracked daemon processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Hangup (dnsmasq re-announces its leases).
    Hup,
    /// Interrupt (graceful shutdown).
    Int,
    /// Quit (graceful shutdown with core dump).
    Quit,
    /// Terminate (graceful shutdown).
    Term,
    /// Kill (immediate termination).
    Kill,
    /// User signal 1.
    Usr1,
    /// User signal 2.
    Usr2,
    /// Stop (pause).
    Stop,
    /// Continue (resume).
    Cont,
}

impl Signal {
    const ALL: [Self; 9] = [
        Self::Hup,
        Self::Int,
        Self::Quit,
        Self::Term,
        Self::Kill,
        Self::Usr1,
        Self::Usr2,
        Self::Stop,
        Self::Cont,
    ];

    /// Returns the Unix signal number.
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        match self {
            Self::Hup => 1,
            Self::Int => 2,
            Self::Quit => 3,
            Self::Term => 15,
            Self::Kill => 9,
            Self::Usr1 => 10,
            Self::Usr2 => 12,
            Self::Stop => 19,
            Self::Cont => 18,
        }
    }

    /// Creates a signal from a Unix signal number.
    #[must_use]
    pub const fn from_i32(sig: i32) -> Option<Self> {
        match sig {
            1 => Some(Self::Hup),
            2 => Some(Self::Int),
            3 => Some(Self::Quit),
            15 => Some(Self::Term),
            9 => Some(Self::Kill),
            10 => Some(Self::Usr1),
            12 => Some(Self::Usr2),
            19 => Some(Self::Stop),
            18 => Some(Self::Cont),
            _ => None,
        }
    }

    /// Returns the conventional name, as understood by `kill -<NAME>`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hup => "SIGHUP",
            Self::Int => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
            Self::Usr1 => "SIGUSR1",
            Self::Usr2 => "SIGUSR2",
            Self::Stop => "SIGSTOP",
            Self::Cont => "SIGCONT",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = DhcpError;

    /// Accepts `SIGHUP`, `HUP`, `hup` or a signal number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(num) = trimmed.parse::<i32>() {
            return Self::from_i32(num).ok_or_else(|| DhcpError::UnknownSignal(s.to_string()));
        }
        let upper = trimmed.to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        Self::ALL
            .into_iter()
            .find(|sig| &sig.name()[3..] == bare)
            .ok_or_else(|| DhcpError::UnknownSignal(s.to_string()))
    }
}
