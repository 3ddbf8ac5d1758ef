// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # dhcpwatch-core
//!
//! Supervise a dnsmasq DHCP server and track the leases it hands out.
//!
//! This crate provides the transport-independent parts of dhcpwatch:
//!
//! - [`ProcessSupervisor`] launches dnsmasq through a privilege helper,
//!   tracks its PID and terminates it
//! - [`ServerObserver`] turns lease signals into a [`LeaseTable`] and wakes
//!   anyone waiting on a [`LeaseWatch`]
//! - [`Controller`] composes both behind start/stop/query/wait operations
//!
//! The process and bus seams are traits ([`ProcessRunner`], [`LeaseBus`],
//! [`BusConnector`]) so tests can drive everything without root or a
//! system bus. The D-Bus transport lives in `dhcpwatch-dbus`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use dhcpwatch_core::{Controller, HarnessConfig, LeaseTime, SystemRunner};
//!
//! let config = HarnessConfig::new("/usr/sbin/dnsmasq")
//!     .with_interface("eth1")
//!     .with_lease_time(LeaseTime::from_secs(300));
//! let mut controller = Controller::new(config, Arc::new(SystemRunner::new()), connector);
//! controller.start(None, None).await?;
//! let ip = controller.wait_lease("00:11:22:33:44:55", Some(Duration::from_secs(30))).await?;
//! controller.stop().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod lease;
pub mod observer;
pub mod runner;
pub mod supervisor;
pub mod types;
pub mod watch;

pub use bus::{BusConnector, BusEvent, EventStream, LeaseBus, LeaseEvent};
pub use config::{BusConfig, HarnessConfig, KillConfig, LeaseTime};
pub use controller::Controller;
pub use error::{DhcpError, ErrorKind, Result};
pub use lease::LeaseTable;
pub use observer::ServerObserver;
pub use runner::{CommandSpec, ProcessRunner, StdinSource, SystemRunner};
pub use supervisor::{ProcessSupervisor, STDIN_CONFIG, read_pid_file};
pub use types::{Lease, LeaseLookup, MacAddress, Signal};
pub use watch::{LeaseWatch, WaitOutcome};
