//! Scripted signal bus.
//!
//! [`FakeBus`] stands in for the D-Bus transport. Tests decide when the
//! service name gets an owner, how the version query answers, and which
//! lease events are delivered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use parking_lot::Mutex;

use dhcpwatch_core::{
    BusConfig, BusConnector, BusEvent, DhcpError, EventStream, LeaseBus, LeaseEvent, Result,
};

/// How the fake answers the version query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionReply {
    /// Reply with this version.
    Version(String),
    /// Reply with an error.
    Fail(String),
    /// Never reply.
    Hang,
}

/// In-memory bus with scripted behavior.
#[derive(Debug)]
pub struct FakeBus {
    owner_present: AtomicBool,
    /// Owner probes that report "no owner" before the name appears.
    owner_after_polls: AtomicUsize,
    owner_polls: AtomicUsize,
    version: Mutex<VersionReply>,
    version_calls: AtomicUsize,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BusEvent>>>,
}

impl Default for FakeBus {
    fn default() -> Self {
        Self {
            owner_present: AtomicBool::new(true),
            owner_after_polls: AtomicUsize::new(0),
            owner_polls: AtomicUsize::new(0),
            version: Mutex::new(VersionReply::Version("2.90".to_string())),
            version_calls: AtomicUsize::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBus {
    /// Creates a bus whose service is present and answers `2.90`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the service name has an owner.
    pub fn set_owner_present(&self, present: bool) {
        self.owner_present.store(present, Ordering::SeqCst);
    }

    /// Makes the name appear only after `polls` unsuccessful probes.
    pub fn set_owner_after_polls(&self, polls: usize) {
        self.owner_after_polls.store(polls, Ordering::SeqCst);
        self.owner_polls.store(0, Ordering::SeqCst);
    }

    /// Number of owner probes so far.
    pub fn owner_polls(&self) -> usize {
        self.owner_polls.load(Ordering::SeqCst)
    }

    /// Scripts the version query.
    pub fn set_version_reply(&self, reply: VersionReply) {
        *self.version.lock() = reply;
    }

    /// Number of version queries so far.
    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }

    /// Number of subscriptions still listening.
    pub fn live_subscribers(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Delivers `event` to every subscriber.
    pub fn emit(&self, event: BusEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    /// Delivers a `DhcpLeaseAdded` signal.
    pub fn lease_added(&self, ip: &str, mac: &str) {
        self.emit(BusEvent::LeaseAdded(LeaseEvent::new(ip, mac, "")));
    }

    /// Delivers a `DhcpLeaseUpdated` signal.
    pub fn lease_updated(&self, ip: &str, mac: &str) {
        self.emit(BusEvent::LeaseUpdated(LeaseEvent::new(ip, mac, "")));
    }

    /// Delivers a `DhcpLeaseDeleted` signal.
    pub fn lease_deleted(&self, ip: &str, mac: &str) {
        self.emit(BusEvent::LeaseDeleted(LeaseEvent::new(ip, mac, "")));
    }

    /// Simulates the service name losing its owner.
    pub fn drop_owner(&self) {
        self.set_owner_present(false);
        self.emit(BusEvent::OwnerChanged(None));
    }

    /// Ends every subscription stream, as a closed connection would.
    pub fn disconnect(&self) {
        self.subscribers.lock().clear();
    }
}

#[async_trait]
impl LeaseBus for FakeBus {
    async fn name_has_owner(&self, _name: &str) -> Result<bool> {
        let polls = self.owner_polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.owner_present.load(Ordering::SeqCst)
            && polls >= self.owner_after_polls.load(Ordering::SeqCst))
    }

    async fn subscribe(&self) -> Result<EventStream> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        Ok(rx.boxed())
    }

    async fn get_version(&self) -> Result<String> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.version.lock().clone();
        match reply {
            VersionReply::Version(v) => Ok(v),
            VersionReply::Fail(msg) => Err(DhcpError::bus(msg)),
            VersionReply::Hang => futures::future::pending().await,
        }
    }
}

/// Hands out the same [`FakeBus`] on every connect.
#[derive(Debug, Clone)]
pub struct FakeConnector {
    bus: Arc<FakeBus>,
    connects: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

impl FakeConnector {
    /// Creates a connector for `bus`.
    #[must_use]
    pub fn new(bus: Arc<FakeBus>) -> Self {
        Self {
            bus,
            connects: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Makes every connect fail, as with no system bus.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl BusConnector for FakeConnector {
    async fn connect(&self, _config: &BusConfig) -> Result<Arc<dyn LeaseBus>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DhcpError::bus("connection refused"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.bus) as Arc<dyn LeaseBus>)
    }
}
