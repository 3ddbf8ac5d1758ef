//! dnsmasq lease signals over zbus.
//!
//! dnsmasq exports `uk.org.thekelleys.dnsmasq` on the system bus when it
//! reads `enable-dbus` from its configuration. Each lease change is a
//! signal carrying `(ipaddr, hwaddr, hostname)`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use zbus::Connection;
use zbus::fdo::DBusProxy;
use zbus::names::BusName;
use zbus::proxy::CacheProperties;

use dhcpwatch_core::{BusConfig, BusConnector, BusEvent, EventStream, LeaseBus, LeaseEvent};

use crate::error::Result;

#[zbus::proxy(
    interface = "uk.org.thekelleys.dnsmasq",
    default_service = "uk.org.thekelleys.dnsmasq",
    default_path = "/uk/org/thekelleys/dnsmasq",
    gen_blocking = false
)]
trait Dnsmasq {
    /// Daemon version string.
    fn get_version(&self) -> zbus::Result<String>;

    /// A lease was allocated.
    #[zbus(signal)]
    fn dhcp_lease_added(&self, ipaddr: String, hwaddr: String, hostname: String)
    -> zbus::Result<()>;

    /// A lease was renewed.
    #[zbus(signal)]
    fn dhcp_lease_updated(
        &self,
        ipaddr: String,
        hwaddr: String,
        hostname: String,
    ) -> zbus::Result<()>;

    /// A lease expired or was released.
    #[zbus(signal)]
    fn dhcp_lease_deleted(
        &self,
        ipaddr: String,
        hwaddr: String,
        hostname: String,
    ) -> zbus::Result<()>;
}

/// Which message bus to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusKind {
    /// The system bus, where dnsmasq normally lives.
    #[default]
    System,
    /// The user session bus.
    Session,
}

/// A live connection to dnsmasq's bus service.
pub struct DnsmasqBus {
    connection: Connection,
    proxy: DnsmasqProxy<'static>,
}

impl DnsmasqBus {
    /// Builds a proxy for the service described by `config` on an existing
    /// connection.
    ///
    /// # Errors
    /// Returns an error for malformed names or if the proxy cannot be built.
    pub async fn new(connection: Connection, config: &BusConfig) -> Result<Self> {
        let proxy = DnsmasqProxy::builder(&connection)
            .destination(config.service_name.clone())?
            .path(config.object_path.clone())?
            .interface(config.interface.clone())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        Ok(Self { connection, proxy })
    }

    /// Underlying connection.
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl std::fmt::Debug for DnsmasqBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsmasqBus")
            .field("destination", &self.proxy.inner().destination().to_string())
            .field("path", &self.proxy.inner().path().to_string())
            .finish_non_exhaustive()
    }
}

fn lease_event(ipaddr: &str, hwaddr: &str, hostname: &str) -> LeaseEvent {
    LeaseEvent::new(ipaddr, hwaddr, hostname)
}

#[async_trait]
impl LeaseBus for DnsmasqBus {
    async fn name_has_owner(&self, name: &str) -> dhcpwatch_core::Result<bool> {
        let owned = async {
            let dbus = DBusProxy::new(&self.connection).await?;
            let name = BusName::try_from(name)?;
            Ok::<_, crate::error::BusError>(dbus.name_has_owner(name).await?)
        };
        Ok(owned.await?)
    }

    async fn subscribe(&self) -> dhcpwatch_core::Result<EventStream> {
        let streams = async {
            let added = self.proxy.receive_dhcp_lease_added().await?;
            let updated = self.proxy.receive_dhcp_lease_updated().await?;
            let deleted = self.proxy.receive_dhcp_lease_deleted().await?;
            let owner = self.proxy.inner().receive_owner_changed().await?;
            Ok::<_, crate::error::BusError>((added, updated, deleted, owner))
        };
        let (added, updated, deleted, owner) = streams.await?;

        let added = added
            .filter_map(|signal| {
                let event = match signal.args() {
                    Ok(a) => Some(BusEvent::LeaseAdded(lease_event(
                        a.ipaddr(),
                        a.hwaddr(),
                        a.hostname(),
                    ))),
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed DhcpLeaseAdded signal");
                        None
                    }
                };
                future::ready(event)
            })
            .boxed();
        let updated = updated
            .filter_map(|signal| {
                let event = match signal.args() {
                    Ok(a) => Some(BusEvent::LeaseUpdated(lease_event(
                        a.ipaddr(),
                        a.hwaddr(),
                        a.hostname(),
                    ))),
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed DhcpLeaseUpdated signal");
                        None
                    }
                };
                future::ready(event)
            })
            .boxed();
        let deleted = deleted
            .filter_map(|signal| {
                let event = match signal.args() {
                    Ok(a) => Some(BusEvent::LeaseDeleted(lease_event(
                        a.ipaddr(),
                        a.hwaddr(),
                        a.hostname(),
                    ))),
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed DhcpLeaseDeleted signal");
                        None
                    }
                };
                future::ready(event)
            })
            .boxed();
        let owner = owner
            .map(|owner| BusEvent::OwnerChanged(owner.map(|name| name.to_string())))
            .boxed();

        Ok(stream::select_all([added, updated, deleted, owner]).boxed())
    }

    async fn get_version(&self) -> dhcpwatch_core::Result<String> {
        let version = self
            .proxy
            .get_version()
            .await
            .map_err(crate::error::BusError::from)?;
        Ok(version)
    }
}

/// Opens a fresh connection per observer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbusConnector {
    kind: BusKind,
}

impl DbusConnector {
    /// Connector for the system bus.
    #[must_use]
    pub const fn system() -> Self {
        Self {
            kind: BusKind::System,
        }
    }

    /// Connector for the session bus.
    #[must_use]
    pub const fn session() -> Self {
        Self {
            kind: BusKind::Session,
        }
    }

    /// Bus this connector opens.
    pub const fn kind(&self) -> BusKind {
        self.kind
    }
}

#[async_trait]
impl BusConnector for DbusConnector {
    async fn connect(&self, config: &BusConfig) -> dhcpwatch_core::Result<Arc<dyn LeaseBus>> {
        let connection = match self.kind {
            BusKind::System => Connection::system().await,
            BusKind::Session => Connection::session().await,
        }
        .map_err(crate::error::BusError::from)?;
        tracing::debug!(bus = ?self.kind, unique_name = ?connection.unique_name(), "connected to message bus");
        let bus = DnsmasqBus::new(connection, config).await?;
        Ok(Arc::new(bus))
    }
}
