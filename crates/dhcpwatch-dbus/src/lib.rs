// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # dhcpwatch-dbus
//!
//! D-Bus transport for dhcpwatch, built on zbus.
//!
//! [`DbusConnector`] opens a connection per observer and hands back a
//! [`DnsmasqBus`], which implements [`dhcpwatch_core::LeaseBus`] by
//! merging dnsmasq's `DhcpLeaseAdded`, `DhcpLeaseUpdated` and
//! `DhcpLeaseDeleted` signals with owner changes of its bus name.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod error;

pub use bus::{BusKind, DbusConnector, DnsmasqBus};
pub use error::{BusError, Result};
