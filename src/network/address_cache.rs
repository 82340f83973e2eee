//! Device address cache
//!
//! Maps a device id to the last address each transport family observed for
//! it. Filled by the notification manager whenever a decoded notification
//! arrives, read by the command senders before delivery. Entries never expire;
//! a newer observation overwrites the old one.
//!
//! Every `remember` is also broadcast as an [`AddressUpdate`], which is how
//! senders learn they can flush commands queued for that device.

use crate::network::{AddressFamily, PeerAddress};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Address observed for a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressUpdate {
    /// Device the address belongs to
    pub device_id: String,
    /// Address now on record
    pub address: PeerAddress,
}

/// Thread-safe device id to address map
pub struct DeviceAddressCache {
    entries: RwLock<HashMap<(String, AddressFamily), PeerAddress>>,
    updates: broadcast::Sender<AddressUpdate>,
}

impl DeviceAddressCache {
    /// Create an empty cache
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Record `address` for `device_id`, replacing any previous address of the
    /// same family
    pub fn remember(&self, device_id: &str, address: PeerAddress) {
        let key = (device_id.to_string(), address.family());
        let changed = {
            let mut entries = self.entries.write();
            entries.insert(key, address.clone()).as_ref() != Some(&address)
        };

        if changed {
            debug!("Cached address {} for device {}", address, device_id);
        }

        // Nobody may be subscribed yet
        let _ = self.updates.send(AddressUpdate {
            device_id: device_id.to_string(),
            address,
        });
    }

    /// Last address of `family` seen for `device_id`
    pub fn lookup(&self, device_id: &str, family: AddressFamily) -> Option<PeerAddress> {
        self.entries
            .read()
            .get(&(device_id.to_string(), family))
            .cloned()
    }

    /// Drop the address of `family` for `device_id`
    pub fn forget(&self, device_id: &str, family: AddressFamily) -> Option<PeerAddress> {
        self.entries.write().remove(&(device_id.to_string(), family))
    }

    /// Subscribe to address updates
    pub fn subscribe(&self) -> broadcast::Receiver<AddressUpdate> {
        self.updates.subscribe()
    }

    /// Number of cached (device, family) entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for DeviceAddressCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bt(mac: &str) -> PeerAddress {
        PeerAddress::Bluetooth(mac.to_string())
    }

    #[test]
    fn test_remember_and_lookup() {
        let cache = DeviceAddressCache::new();
        assert!(cache.lookup("phone", AddressFamily::Bluetooth).is_none());

        cache.remember("phone", bt("00:11:22:33:44:55"));
        assert_eq!(
            cache.lookup("phone", AddressFamily::Bluetooth),
            Some(bt("00:11:22:33:44:55"))
        );
        assert!(cache.lookup("phone", AddressFamily::Ip).is_none());
        assert!(cache.lookup("other", AddressFamily::Bluetooth).is_none());
    }

    #[test]
    fn test_overwrite() {
        let cache = DeviceAddressCache::new();
        cache.remember("phone", bt("00:00:00:00:00:01"));
        cache.remember("phone", bt("00:00:00:00:00:02"));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.lookup("phone", AddressFamily::Bluetooth),
            Some(bt("00:00:00:00:00:02"))
        );
    }

    #[test]
    fn test_families_are_independent() {
        let cache = DeviceAddressCache::new();
        let ip = PeerAddress::Ip("10.0.0.5:5000".parse().unwrap());
        cache.remember("phone", bt("00:00:00:00:00:01"));
        cache.remember("phone", ip.clone());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.forget("phone", AddressFamily::Bluetooth), Some(bt("00:00:00:00:00:01")));
        assert_eq!(cache.lookup("phone", AddressFamily::Ip), Some(ip));
    }

    #[tokio::test]
    async fn test_updates_are_broadcast() {
        let cache = DeviceAddressCache::new();
        let mut rx = cache.subscribe();

        cache.remember("phone", bt("00:00:00:00:00:01"));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.device_id, "phone");
        assert_eq!(update.address, bt("00:00:00:00:00:01"));
    }
}
