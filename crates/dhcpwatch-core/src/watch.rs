//! Single-slot lease watch.
//!
//! A caller registers one MAC address and then waits for it to acquire (or
//! renew) a lease. Only one MAC can be watched at a time: a new `watch`
//! silently replaces the previous target.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::types::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchSignal {
    Pending,
    Fired,
    Aborted,
}

/// Result of [`LeaseWatch::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The watched MAC acquired a lease.
    Fired,
    /// The timeout elapsed first.
    TimedOut,
    /// The event source was lost; no lease will ever arrive.
    Aborted,
}

impl WaitOutcome {
    /// Returns true if the watch fired.
    #[must_use]
    pub const fn fired(&self) -> bool {
        matches!(self, Self::Fired)
    }
}

/// Wake-up slot for one watched MAC address.
#[derive(Debug)]
pub struct LeaseWatch {
    target: Mutex<Option<MacAddress>>,
    signal: watch::Sender<WatchSignal>,
}

impl Default for LeaseWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseWatch {
    /// Creates a watch with no target.
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(WatchSignal::Pending);
        Self {
            target: Mutex::new(None),
            signal,
        }
    }

    /// Makes `mac` the sole target and clears the signal.
    pub fn watch(&self, mac: MacAddress) {
        let mut target = self.target.lock();
        tracing::debug!(mac = %mac, "watching for lease");
        *target = Some(mac);
        // Aborted is sticky.
        self.signal.send_if_modified(|state| {
            if *state == WatchSignal::Fired {
                *state = WatchSignal::Pending;
                true
            } else {
                false
            }
        });
    }

    /// Fires the signal if `mac` is the current target.
    pub fn notify(&self, mac: &MacAddress) {
        let target = self.target.lock();
        if target.as_ref() == Some(mac) {
            self.signal.send_if_modified(|state| {
                if *state == WatchSignal::Pending {
                    *state = WatchSignal::Fired;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Wakes every waiter with [`WaitOutcome::Aborted`], now and from now on.
    pub fn abort(&self) {
        self.signal.send_replace(WatchSignal::Aborted);
    }

    /// Current target, if any.
    pub fn target(&self) -> Option<MacAddress> {
        self.target.lock().clone()
    }

    /// Returns true if the signal is set.
    pub fn is_fired(&self) -> bool {
        *self.signal.borrow() == WatchSignal::Fired
    }

    /// Waits until the signal fires or `timeout` elapses.
    ///
    /// The signal is not cleared on return; call [`watch`](Self::watch)
    /// again to re-arm it.
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        let mut rx = self.signal.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != WatchSignal::Pending),
        )
        .await;
        match waited {
            Ok(Ok(state)) if *state == WatchSignal::Fired => WaitOutcome::Fired,
            Ok(_) => WaitOutcome::Aborted,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}
