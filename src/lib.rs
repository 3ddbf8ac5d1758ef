//! dhcpwatch: DHCP server supervision for test automation.
//!
//! Starts dnsmasq on a test interface, follows its leases over D-Bus and
//! lets a test wait for a host to get (or not get) an address.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use dhcpwatch::prelude::*;
//!
//! # async fn run() -> dhcpwatch::core::Result<()> {
//! let config = HarnessConfig::new("/usr/sbin/dnsmasq")
//!     .with_interface("eth1")
//!     .with_lease_time(LeaseTime::from_secs(300));
//! let mut controller = Controller::new(
//!     config,
//!     Arc::new(SystemRunner::new()),
//!     Arc::new(DbusConnector::system()),
//! );
//! controller.start(None, None).await?;
//! let ip = controller
//!     .wait_lease("00:11:22:33:44:55", Some(Duration::from_secs(30)))
//!     .await?;
//! println!("host got {ip}");
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```

pub use dhcpwatch_core as core;
pub use dhcpwatch_dbus as dbus;

/// Prelude module for common imports.
pub mod prelude {
    pub use dhcpwatch_core::{
        Controller, DhcpError, ErrorKind, HarnessConfig, Lease, LeaseLookup, LeaseTime,
        MacAddress, ServerObserver, Signal, SystemRunner,
    };
    pub use dhcpwatch_dbus::{BusKind, DbusConnector};
}
