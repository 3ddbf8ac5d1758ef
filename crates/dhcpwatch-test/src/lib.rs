// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # dhcpwatch-test
//!
//! Testing infrastructure for dhcpwatch.
//!
//! This crate provides:
//! - **Scripted bus**: [`FakeBus`] delivers lease signals on demand and
//!   scripts owner presence and the version handshake
//! - **Scripted runner**: [`FakeRunner`] emulates dnsmasq, `kill` and the
//!   run-directory tools without root
//! - **Harness**: [`DhcpTestHarness`] wires both into a [`Controller`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use dhcpwatch_test::DhcpTestHarness;
//!
//! let harness = DhcpTestHarness::new()?;
//! let controller = harness.started_controller().await?;
//! harness.bus.lease_added("192.168.0.130", "aa:bb:cc:dd:ee:ff");
//! ```
//!
//! [`Controller`]: dhcpwatch_core::Controller

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod error;
pub mod harness;
pub mod runner;

pub use bus::{FakeBus, FakeConnector, VersionReply};
pub use error::{Result, TestError};
pub use harness::{DhcpTestHarness, DhcpTestHarnessBuilder, TEST_INTERFACE};
pub use runner::{FAKE_DAEMON_PID, FakeRunner};
