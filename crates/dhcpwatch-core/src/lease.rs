//! Thread-safe lease table: hardware address to IPv4 address.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{Lease, LeaseLookup, MacAddress};

/// Current leases as announced by the DHCP server.
///
/// A single lock serializes every read and write. The table keeps no
/// history: a second announcement for the same MAC overwrites the first.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: Mutex<HashMap<MacAddress, String>>,
}

impl LeaseTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the mapping with an empty one.
    pub fn reset(&self) {
        *self.leases.lock() = HashMap::new();
    }

    /// Inserts or overwrites the lease held by `mac`.
    pub fn put(&self, mac: MacAddress, ip: impl Into<String>) {
        self.leases.lock().insert(mac, ip.into());
    }

    /// Removes the lease held by `mac`.
    ///
    /// An absent key is not an error: the table may have been reset while
    /// the deletion was in flight.
    pub fn remove(&self, mac: &MacAddress) {
        if self.leases.lock().remove(mac).is_none() {
            tracing::warn!(
                mac = %mac,
                "cannot delete lease that does not exist (table reset in the meantime?)"
            );
        }
    }

    /// Looks up the lease held by `mac`.
    pub fn get(&self, mac: &MacAddress) -> LeaseLookup {
        self.leases.lock().get(mac).cloned().into()
    }

    /// Copies the table at one point in time.
    pub fn snapshot(&self) -> Vec<Lease> {
        self.leases
            .lock()
            .iter()
            .map(|(mac, ip)| Lease::new(mac.clone(), ip.clone()))
            .collect()
    }

    /// Number of leases.
    pub fn len(&self) -> usize {
        self.leases.lock().len()
    }

    /// Returns true if no lease is known.
    pub fn is_empty(&self) -> bool {
        self.leases.lock().is_empty()
    }
}
