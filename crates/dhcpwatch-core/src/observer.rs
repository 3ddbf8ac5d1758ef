//! Lease observer.
//!
//! Bridges the DHCP server's bus signals into a [`LeaseTable`] and a
//! [`LeaseWatch`]. Startup is linear, with no retries beyond the bounded
//! owner wait:
//!
//! ```text
//! AwaitOwner → Connect (subscribe) → RunLoop (spawn) → Handshake → Ready (table cleared)
//! ```
//!
//! All event handlers run on the background loop task. They never block
//! and never call back into anything that waits on the loop. Losing the
//! bus owner marks the observer as lost and wakes every waiter; the next
//! query reports [`DhcpError::RemoteLost`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bus::{BusEvent, EventStream, LeaseBus, LeaseEvent};
use crate::config::BusConfig;
use crate::error::{DhcpError, Result};
use crate::lease::LeaseTable;
use crate::types::{Lease, LeaseLookup, MacAddress};
use crate::watch::{LeaseWatch, WaitOutcome};

/// State shared between the loop task and foreground callers.
#[derive(Debug, Default)]
struct ObserverState {
    table: LeaseTable,
    watch: LeaseWatch,
    lost: AtomicBool,
}

impl ObserverState {
    fn handle(&self, event: BusEvent, service: &str) {
        match event {
            BusEvent::LeaseAdded(LeaseEvent { ip, mac, .. }) => {
                tracing::info!(ip = %ip, mac = %mac, "DhcpLeaseAdded");
                self.acquire(mac, ip);
            }
            BusEvent::LeaseUpdated(LeaseEvent { ip, mac, .. }) => {
                tracing::debug!(ip = %ip, mac = %mac, "DhcpLeaseUpdated");
                self.acquire(mac, ip);
            }
            BusEvent::LeaseDeleted(LeaseEvent { ip, mac, .. }) => {
                tracing::info!(ip = %ip, mac = %mac, "DhcpLeaseDeleted");
                self.table.remove(&mac);
            }
            BusEvent::OwnerChanged(owner) => match owner.filter(|o| !o.is_empty()) {
                Some(owner) => tracing::debug!(service, owner = %owner, "bus owner changed"),
                None => {
                    tracing::warn!(service, "no owner anymore for bus name");
                    self.mark_lost();
                }
            },
        }
    }

    fn acquire(&self, mac: MacAddress, ip: String) {
        // Table first, watch second: never both locks at once.
        self.table.put(mac.clone(), ip);
        self.watch.notify(&mac);
    }

    fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
        self.watch.abort();
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

/// Observes one DHCP server over the signal bus.
pub struct ServerObserver {
    config: BusConfig,
    state: Arc<ObserverState>,
    version: String,
    bus: Option<Arc<dyn LeaseBus>>,
    shutdown: Option<oneshot::Sender<()>>,
    event_loop: Option<JoinHandle<()>>,
}

impl ServerObserver {
    /// Connects to the DHCP server and starts observing its leases.
    ///
    /// # Errors
    /// - [`DhcpError::NoBusOwner`] if the service never appears
    /// - [`DhcpError::HandshakeError`] / [`DhcpError::HandshakeTimeout`]
    ///   if the version query fails or stalls
    pub async fn connect(bus: Arc<dyn LeaseBus>, config: BusConfig) -> Result<Self> {
        await_owner(bus.as_ref(), &config).await?;

        tracing::debug!(path = %config.object_path, "subscribing to lease signals");
        let events = bus.subscribe().await?;

        let state = Arc::new(ObserverState::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let event_loop = tokio::spawn(run_event_loop(
            events,
            Arc::clone(&state),
            shutdown_rx,
            config.service_name.clone(),
        ));

        let mut observer = Self {
            config,
            state,
            version: String::new(),
            bus: Some(Arc::clone(&bus)),
            shutdown: Some(shutdown_tx),
            event_loop: Some(event_loop),
        };

        match handshake(bus, observer.config.handshake_timeout).await {
            Ok(version) => {
                tracing::debug!(version = %version, "dnsmasq version");
                observer.version = version;
            }
            Err(e) => {
                observer.stop_loop().await;
                return Err(e);
            }
        }

        observer.state.table.reset();
        Ok(observer)
    }

    /// Version string returned by the handshake.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns true until [`exit`](Self::exit) is called.
    pub fn is_connected(&self) -> bool {
        self.bus.is_some()
    }

    /// Returns true if the bus owner disappeared.
    pub fn is_lost(&self) -> bool {
        self.state.is_lost()
    }

    fn ensure_live(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(DhcpError::NotConnected);
        }
        if self.state.is_lost() {
            return Err(DhcpError::RemoteLost(self.config.service_name.clone()));
        }
        Ok(())
    }

    /// Looks up the lease held by `mac` (case-insensitive).
    ///
    /// # Errors
    /// Returns [`DhcpError::NotConnected`] after `exit`, or
    /// [`DhcpError::RemoteLost`] once the server vanished.
    pub fn get_ip(&self, mac: impl Into<MacAddress>) -> Result<LeaseLookup> {
        self.ensure_live()?;
        Ok(self.state.table.get(&mac.into()))
    }

    /// Copies every known lease.
    ///
    /// # Errors
    /// Same as [`get_ip`](Self::get_ip).
    pub fn leases(&self) -> Result<Vec<Lease>> {
        self.ensure_live()?;
        Ok(self.state.table.snapshot())
    }

    /// Forgets every known lease.
    ///
    /// # Errors
    /// Same as [`get_ip`](Self::get_ip).
    pub fn reset(&self) -> Result<()> {
        self.ensure_live()?;
        self.state.table.reset();
        Ok(())
    }

    /// Registers `mac` as the single watch target.
    ///
    /// # Errors
    /// Same as [`get_ip`](Self::get_ip).
    pub fn watch(&self, mac: impl Into<MacAddress>) -> Result<()> {
        self.ensure_live()?;
        self.state.watch.watch(mac.into());
        Ok(())
    }

    /// Waits for the watch target to acquire a lease.
    ///
    /// # Errors
    /// Returns [`DhcpError::RemoteLost`] if the server vanished while
    /// waiting.
    pub async fn wait(&self, timeout: Duration) -> Result<bool> {
        self.ensure_live()?;
        match self.state.watch.wait(timeout).await {
            WaitOutcome::Fired => Ok(true),
            WaitOutcome::TimedOut => Ok(false),
            WaitOutcome::Aborted => Err(DhcpError::RemoteLost(self.config.service_name.clone())),
        }
    }

    /// Returns the lease held by `mac`, waiting up to `timeout` for one.
    ///
    /// A zero timeout only checks the current table.
    ///
    /// # Errors
    /// Same as [`wait`](Self::wait).
    pub async fn wait_for_lease(
        &self,
        mac: impl Into<MacAddress>,
        timeout: Duration,
    ) -> Result<LeaseLookup> {
        let mac = mac.into();
        let found = self.get_ip(mac.clone())?;
        if found.is_found() || timeout.is_zero() {
            return Ok(found);
        }

        self.watch(mac.clone())?;
        // A lease may have landed between the lookup and the watch.
        let found = self.state.table.get(&mac);
        if found.is_found() {
            return Ok(found);
        }

        if self.wait(timeout).await? {
            Ok(self.state.table.get(&mac))
        } else {
            Ok(LeaseLookup::NotFound)
        }
    }

    /// Stops the event loop and releases the bus connection.
    ///
    /// # Errors
    /// Returns [`DhcpError::NotConnected`] if already stopped.
    pub async fn exit(&mut self) -> Result<()> {
        if self.bus.is_none() {
            return Err(DhcpError::NotConnected);
        }
        self.stop_loop().await;
        self.bus = None;
        tracing::debug!(service = %self.config.service_name, "observer stopped");
        Ok(())
    }

    async fn stop_loop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut handle) = self.event_loop.take() {
            if tokio::time::timeout(self.config.shutdown_grace, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("bus event loop did not stop in time, aborting it");
                handle.abort();
            }
        }
    }
}

impl Drop for ServerObserver {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ServerObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerObserver")
            .field("service", &self.config.service_name)
            .field("version", &self.version)
            .field("connected", &self.is_connected())
            .field("lost", &self.is_lost())
            .finish_non_exhaustive()
    }
}

/// Polls until `service_name` has an owner.
async fn await_owner(bus: &dyn LeaseBus, config: &BusConfig) -> Result<()> {
    let name = &config.service_name;
    tracing::debug!(name = %name, "waiting for an owner on bus name");
    let deadline = tokio::time::Instant::now() + config.owner_timeout;
    loop {
        if bus.name_has_owner(name).await? {
            tracing::debug!(name = %name, "got an owner for bus name");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(DhcpError::NoBusOwner {
                name: name.clone(),
                waited: config.owner_timeout,
            });
        }
        tokio::time::sleep(config.owner_poll_interval).await;
    }
}

/// Issues the version query and waits for its reply slot.
async fn handshake(bus: Arc<dyn LeaseBus>, timeout: Duration) -> Result<String> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let call = tokio::spawn(async move {
        let _ = reply_tx.send(bus.get_version().await);
    });

    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(Ok(version))) => Ok(version),
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "GetVersion failed");
            Err(DhcpError::HandshakeError(e.to_string()))
        }
        Ok(Err(_)) => Err(DhcpError::HandshakeError(
            "version call ended without a reply".to_string(),
        )),
        Err(_) => {
            call.abort();
            Err(DhcpError::HandshakeTimeout(timeout))
        }
    }
}

async fn run_event_loop(
    mut events: EventStream,
    state: Arc<ObserverState>,
    mut shutdown: oneshot::Receiver<()>,
    service: String,
) {
    tracing::debug!("starting bus event loop");
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = events.next() => match event {
                Some(event) => state.handle(event, &service),
                None => {
                    tracing::warn!(service = %service, "bus event stream ended");
                    state.mark_lost();
                    break;
                }
            },
        }
    }
    tracing::debug!("stopping bus event loop");
}
