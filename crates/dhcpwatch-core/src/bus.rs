//! Signal-bus seam.
//!
//! [`LeaseBus`] is implemented by the D-Bus transport in `dhcpwatch-dbus`
//! and by the scripted fake in `dhcpwatch-test`. The observer only sees
//! decoded [`BusEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::BusConfig;
use crate::error::Result;
use crate::types::MacAddress;

/// Payload of a lease lifecycle signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseEvent {
    /// IPv4 address.
    pub ip: String,
    /// Hardware address, normalized.
    pub mac: MacAddress,
    /// Hostname reported by the client (may be empty).
    pub hostname: String,
}

impl LeaseEvent {
    /// Creates an event, normalizing the MAC address.
    #[must_use]
    pub fn new(ip: impl Into<String>, mac: impl AsRef<str>, hostname: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            mac: MacAddress::new(mac),
            hostname: hostname.into(),
        }
    }
}

/// Events delivered by the bus, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A lease was allocated.
    LeaseAdded(LeaseEvent),
    /// A lease was renewed or changed.
    LeaseUpdated(LeaseEvent),
    /// A lease expired or was released.
    LeaseDeleted(LeaseEvent),
    /// The owner of the service name changed; `None` means it vanished.
    OwnerChanged(Option<String>),
}

/// Stream of decoded bus events.
pub type EventStream = BoxStream<'static, BusEvent>;

/// Connection to the bus the DHCP server announces its leases on.
#[async_trait]
pub trait LeaseBus: Send + Sync {
    /// Returns true if `name` currently has an owner on the bus.
    async fn name_has_owner(&self, name: &str) -> Result<bool>;

    /// Subscribes to the lease signals and owner changes of the service.
    ///
    /// The stream ends when the underlying connection closes.
    async fn subscribe(&self) -> Result<EventStream>;

    /// Calls the service's version query.
    async fn get_version(&self) -> Result<String>;
}

/// Opens bus connections.
///
/// Each observer gets its own connection and releases it on exit.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Connects to the bus described by `config`.
    async fn connect(&self, config: &BusConfig) -> Result<Arc<dyn LeaseBus>>;
}
