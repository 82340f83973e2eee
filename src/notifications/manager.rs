//! Notification Manager
//!
//! Aggregates the configured listeners, decodes every raw unit they deliver,
//! drops duplicates and routes the result to the consumers.
//!
//! ## Routing
//!
//! - Every decoded notification except PING goes to the [`NotificationCallback`].
//! - PING belongs to the pairing sub-protocol and always goes to the
//!   [`PairingCallback`]. If the pairing consumer reports the device as already
//!   paired, the primary callback receives it too, before the pairing callback.
//!
//! Malformed units are logged and dropped; nothing a phone sends can make the
//! manager fail.
//!
//! ## Example
//!
//! ```rust
//! use notifier_bridge_core::network::PeerAddress;
//! use notifier_bridge_core::notifications::{
//!     NotificationCallback, NotificationManager, PairingCallback,
//! };
//! use notifier_bridge_core::protocol::Notification;
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl NotificationCallback for Print {
//!     fn on_notification(&self, notification: &Notification) {
//!         println!("{}", notification);
//!     }
//! }
//!
//! impl PairingCallback for Print {
//!     fn on_pairing_notification(&self, notification: &Notification) {
//!         println!("pairing request from {}", notification.device_id);
//!     }
//! }
//!
//! let manager = NotificationManager::new(Arc::new(Print), Arc::new(Print));
//! let origin = PeerAddress::Ip("192.168.1.20:40000".parse().unwrap());
//!
//! manager.handle_raw_data(b"phone|1|RING|Mom", &origin);
//! manager.handle_raw_data(b"phone|1|RING|Mom", &origin);
//! assert_eq!(manager.stats().received, 1);
//! assert_eq!(manager.stats().duplicates, 1);
//! ```

use super::dedup::RecentNotifications;
use crate::config::{BridgeConfig, DEFAULT_RECENT_CAPACITY};
use crate::error::ProtocolError;
use crate::network::radio::RadioBackend;
use crate::network::{
    BluetoothNotificationListener, DeviceAddressCache, NotificationListener, PeerAddress,
    RawDataCallback, TcpNotificationListener, TransportType, UdpNotificationListener,
};
use crate::protocol::{codec, Notification};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Primary consumer of decoded notifications
///
/// Called synchronously from listener tasks, possibly concurrently. Must not
/// block.
pub trait NotificationCallback: Send + Sync {
    /// Handle a notification that passed dedup
    fn on_notification(&self, notification: &Notification);
}

/// Consumer of the pairing sub-protocol (PING notifications)
pub trait PairingCallback: Send + Sync {
    /// Handle a PING notification
    fn on_pairing_notification(&self, notification: &Notification);

    /// Whether `device_id` is already paired
    ///
    /// PINGs from paired devices are also delivered to the primary callback.
    fn is_paired(&self, _device_id: &str) -> bool {
        false
    }
}

/// A listener that could not be started
#[derive(Debug)]
pub struct ListenerFailure {
    /// Transport of the failed listener
    pub transport: TransportType,
    /// Why it failed
    pub error: ProtocolError,
}

/// Counters kept by the manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Notifications that passed dedup and were dispatched
    pub received: u64,
    /// Notifications dropped as duplicates
    pub duplicates: u64,
    /// Units that failed to decode
    pub malformed: u64,
}

/// Dedup window and counters, guarded together
struct DedupState {
    recent: RecentNotifications,
    stats: ManagerStats,
}

/// Shared part of the manager, registered as every listener's callback
struct ManagerCore {
    callback: Arc<dyn NotificationCallback>,
    pairing: Arc<dyn PairingCallback>,
    addresses: Arc<DeviceAddressCache>,
    state: Mutex<DedupState>,
}

impl ManagerCore {
    fn new(
        callback: Arc<dyn NotificationCallback>,
        pairing: Arc<dyn PairingCallback>,
        addresses: Arc<DeviceAddressCache>,
        recent_capacity: usize,
    ) -> Self {
        Self {
            callback,
            pairing,
            addresses,
            state: Mutex::new(DedupState {
                recent: RecentNotifications::new(recent_capacity),
                stats: ManagerStats::default(),
            }),
        }
    }

    fn recent_capacity(&self) -> usize {
        self.state.lock().recent.capacity()
    }

    fn handle(&self, data: &[u8], origin: &PeerAddress) {
        let notification = match codec::decode_notification(data) {
            Ok(notification) => notification,
            Err(e) => {
                self.state.lock().stats.malformed += 1;
                warn!("Dropping malformed unit from {}: {}", origin, e);
                return;
            }
        };

        // A duplicate still proves the device is reachable at `origin`
        self.addresses
            .remember(&notification.device_id, origin.clone());

        // Check and insert under one lock so concurrent duplicates cannot both pass
        let fresh = {
            let mut state = self.state.lock();
            let (device_id, notification_id) = notification.dedup_key();
            let fresh = state.recent.insert(device_id, notification_id);
            if fresh {
                state.stats.received += 1;
            } else {
                state.stats.duplicates += 1;
            }
            fresh
        };

        if !fresh {
            debug!(
                "Dropping duplicate {} from {} via {}",
                notification.notification_id, notification.device_id, origin
            );
            return;
        }

        debug!("Received {} via {}", notification, origin);
        self.dispatch(&notification);
    }

    fn dispatch(&self, notification: &Notification) {
        if notification.is_pairing() {
            if self.pairing.is_paired(&notification.device_id) {
                self.callback.on_notification(notification);
            }
            self.pairing.on_pairing_notification(notification);
        } else {
            self.callback.on_notification(notification);
        }
    }
}

impl RawDataCallback for ManagerCore {
    fn on_raw_data(&self, data: &[u8], origin: &PeerAddress) {
        self.handle(data, origin);
    }
}

/// Notification Manager
///
/// Owns the listeners and the dedup window.
pub struct NotificationManager {
    core: Arc<ManagerCore>,
    listeners: Vec<Box<dyn NotificationListener>>,
}

impl NotificationManager {
    /// Create a manager with no listeners, a private address cache and the
    /// default dedup window
    pub fn new(callback: Arc<dyn NotificationCallback>, pairing: Arc<dyn PairingCallback>) -> Self {
        Self {
            core: Arc::new(ManagerCore::new(
                callback,
                pairing,
                Arc::new(DeviceAddressCache::new()),
                DEFAULT_RECENT_CAPACITY,
            )),
            listeners: Vec::new(),
        }
    }

    /// Builder: record observed addresses in `cache`
    ///
    /// Must be called before [`start`](Self::start).
    pub fn with_address_cache(mut self, cache: Arc<DeviceAddressCache>) -> Self {
        let capacity = self.core.recent_capacity();
        self.core = Arc::new(ManagerCore::new(
            self.core.callback.clone(),
            self.core.pairing.clone(),
            cache,
            capacity,
        ));
        self
    }

    /// Builder: keep `capacity` recent notification ids for dedup
    ///
    /// Must be called before [`start`](Self::start). The counters restart at
    /// zero.
    pub fn with_recent_capacity(mut self, capacity: usize) -> Self {
        self.core = Arc::new(ManagerCore::new(
            self.core.callback.clone(),
            self.core.pairing.clone(),
            self.core.addresses.clone(),
            capacity,
        ));
        self
    }

    /// Create a manager with a listener for every enabled transport in
    /// `config`
    ///
    /// The Bluetooth listener needs a radio; when it is enabled but `radio` is
    /// `None` it is skipped with a warning.
    pub fn from_config(
        config: &BridgeConfig,
        callback: Arc<dyn NotificationCallback>,
        pairing: Arc<dyn PairingCallback>,
        radio: Option<Arc<dyn RadioBackend>>,
    ) -> Self {
        let mut manager = Self::new(callback, pairing)
            .with_recent_capacity(config.manager.recent_capacity);
        let listeners = &config.listeners;

        if listeners.tcp.enabled {
            manager.add_listener(Box::new(TcpNotificationListener::new(&listeners.tcp)));
        }
        if listeners.udp.enabled {
            manager.add_listener(Box::new(UdpNotificationListener::new(&listeners.udp)));
        }
        if listeners.bluetooth.enabled {
            match radio {
                Some(radio) => manager.add_listener(Box::new(BluetoothNotificationListener::new(
                    radio,
                    &listeners.bluetooth,
                ))),
                None => warn!("Bluetooth listener enabled but no radio is available, skipping"),
            }
        }

        manager
    }

    /// Register a listener; it is started by the next [`start`](Self::start)
    pub fn add_listener(&mut self, listener: Box<dyn NotificationListener>) {
        debug!("Adding {} listener", listener.transport());
        self.listeners.push(listener);
    }

    /// Start every registered listener
    ///
    /// Listeners that fail to start are logged and returned; the others keep
    /// running. Already running listeners are left alone.
    pub async fn start(&mut self) -> Vec<ListenerFailure> {
        let callback: Arc<dyn RawDataCallback> = self.core.clone();
        let mut failures = Vec::new();

        for listener in self.listeners.iter_mut() {
            if listener.is_running() {
                continue;
            }
            let transport = listener.transport();
            if let Err(e) = listener.start(callback.clone()).await {
                error!("Failed to start {} listener: {}", transport, e);
                failures.push(ListenerFailure {
                    transport,
                    error: e,
                });
            }
        }

        info!(
            "Notification manager started ({} of {} listeners running)",
            self.running_transports().len(),
            self.listeners.len()
        );
        failures
    }

    /// Stop every listener
    ///
    /// Once this returns no callback is invoked again until the next start.
    pub async fn stop(&mut self) {
        for listener in self.listeners.iter_mut() {
            listener.stop().await;
        }
        info!("Notification manager stopped");
    }

    /// Transports whose listener is currently running
    pub fn running_transports(&self) -> Vec<TransportType> {
        self.listeners
            .iter()
            .filter(|l| l.is_running())
            .map(|l| l.transport())
            .collect()
    }

    /// Bound socket addresses of the running IP listeners
    pub fn local_addrs(&self) -> Vec<(TransportType, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().map(|addr| (l.transport(), addr)))
            .collect()
    }

    /// Decode, dedup and dispatch one raw unit
    ///
    /// This is what the listeners call; exposed for hosts that receive units
    /// through their own transports.
    pub fn handle_raw_data(&self, data: &[u8], origin: &PeerAddress) {
        self.core.handle(data, origin);
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ManagerStats {
        self.core.state.lock().stats
    }

    /// Cache receiving every observed device address
    pub fn address_cache(&self) -> Arc<DeviceAddressCache> {
        self.core.addresses.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::network::AddressFamily;
    use crate::protocol::NotificationType;
    use async_trait::async_trait;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Recorder {
        primary: Mutex<Vec<Notification>>,
        pairing: Mutex<Vec<Notification>>,
        // Both callbacks, in call order
        calls: Mutex<Vec<&'static str>>,
        paired: Mutex<HashSet<String>>,
    }

    impl NotificationCallback for Recorder {
        fn on_notification(&self, notification: &Notification) {
            self.primary.lock().push(notification.clone());
            self.calls.lock().push("primary");
        }
    }

    impl PairingCallback for Recorder {
        fn on_pairing_notification(&self, notification: &Notification) {
            self.pairing.lock().push(notification.clone());
            self.calls.lock().push("pairing");
        }

        fn is_paired(&self, device_id: &str) -> bool {
            self.paired.lock().contains(device_id)
        }
    }

    fn manager() -> (NotificationManager, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let manager = NotificationManager::new(recorder.clone(), recorder.clone());
        (manager, recorder)
    }

    fn origin() -> PeerAddress {
        PeerAddress::Ip("192.168.1.20:40000".parse().unwrap())
    }

    #[test]
    fn test_duplicate_delivered_once() {
        let (manager, recorder) = manager();
        manager.handle_raw_data(b"d1|n1|SMS|hello|+15551234", &origin());
        manager.handle_raw_data(b"d1|n1|SMS|hello|+15551234", &origin());

        let primary = recorder.primary.lock();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].notification_type, NotificationType::Sms);
        assert_eq!(primary[0].data.as_deref(), Some("+15551234"));
        assert_eq!(
            manager.stats(),
            ManagerStats {
                received: 1,
                duplicates: 1,
                malformed: 0
            }
        );
    }

    #[test]
    fn test_same_id_from_other_device_is_not_duplicate() {
        let (manager, recorder) = manager();
        manager.handle_raw_data(b"d1|n1|RING|Mom", &origin());
        manager.handle_raw_data(b"d2|n1|RING|Mom", &origin());
        assert_eq!(recorder.primary.lock().len(), 2);
    }

    #[test]
    fn test_ring_bound_allows_redelivery() {
        let recorder = Arc::new(Recorder::default());
        let manager =
            NotificationManager::new(recorder.clone(), recorder.clone()).with_recent_capacity(3);

        for id in 0..4 {
            let unit = format!("d1|n{}|BATTERY|80%", id);
            manager.handle_raw_data(unit.as_bytes(), &origin());
        }
        // n0 was evicted by n3
        manager.handle_raw_data(b"d1|n0|BATTERY|80%", &origin());
        // n3 is still in the window
        manager.handle_raw_data(b"d1|n3|BATTERY|80%", &origin());

        assert_eq!(recorder.primary.lock().len(), 5);
        assert_eq!(manager.stats().duplicates, 1);
    }

    #[test]
    fn test_ping_goes_to_pairing_only_when_unpaired() {
        let (manager, recorder) = manager();
        manager.handle_raw_data(b"d1|p1|PING|pair me", &origin());
        manager.handle_raw_data(b"d1|n1|RING|Mom", &origin());

        assert_eq!(recorder.pairing.lock().len(), 1);
        assert_eq!(recorder.pairing.lock()[0].notification_type, NotificationType::Ping);
        let primary = recorder.primary.lock();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].notification_type, NotificationType::Ring);
    }

    #[test]
    fn test_ping_from_paired_device_goes_primary_then_pairing() {
        let (manager, recorder) = manager();
        recorder.paired.lock().insert("d1".to_string());

        manager.handle_raw_data(b"d1|p1|PING|hello", &origin());

        assert_eq!(*recorder.calls.lock(), vec!["primary", "pairing"]);
    }

    #[test]
    fn test_non_ping_never_reaches_pairing() {
        let (manager, recorder) = manager();
        recorder.paired.lock().insert("d1".to_string());

        for (i, kind) in NotificationType::ALL.iter().enumerate() {
            if *kind == NotificationType::Ping {
                continue;
            }
            let unit = format!("d1|n{}|{}|x", i, kind);
            manager.handle_raw_data(unit.as_bytes(), &origin());
        }

        assert!(recorder.pairing.lock().is_empty());
        assert_eq!(recorder.primary.lock().len(), NotificationType::ALL.len() - 1);
    }

    #[test]
    fn test_malformed_input_is_dropped() {
        let (manager, recorder) = manager();
        manager.handle_raw_data(b"deviceA|bogusType|hello", &origin());
        manager.handle_raw_data(b"deviceA|n1", &origin());
        manager.handle_raw_data(b"deviceA|n1|RING|bad\\xescape", &origin());
        manager.handle_raw_data(&[0xff, 0xfe, b'|'], &origin());

        assert!(recorder.primary.lock().is_empty());
        assert!(recorder.pairing.lock().is_empty());
        assert_eq!(manager.stats().malformed, 4);
        assert!(manager.address_cache().is_empty());
    }

    #[test]
    fn test_origin_is_cached() {
        let (manager, _recorder) = manager();
        let bt = PeerAddress::Bluetooth("00:11:22:33:44:55".to_string());
        manager.handle_raw_data(b"d1|n1|RING|Mom", &origin());
        manager.handle_raw_data(b"d1|n1|RING|Mom", &bt);

        let cache = manager.address_cache();
        assert_eq!(cache.lookup("d1", AddressFamily::Ip), Some(origin()));
        assert_eq!(cache.lookup("d1", AddressFamily::Bluetooth), Some(bt));
    }

    #[test]
    fn test_concurrent_duplicates_delivered_once() {
        let (manager, recorder) = manager();
        let manager = Arc::new(manager);

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        manager.handle_raw_data(b"d1|same|SMS|hi", &origin());
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(recorder.primary.lock().len(), 1);
        assert_eq!(manager.stats().received, 1);
        assert_eq!(manager.stats().duplicates, 16 * 50 - 1);
    }

    struct FailingListener;

    #[async_trait]
    impl NotificationListener for FailingListener {
        fn transport(&self) -> TransportType {
            TransportType::Bluetooth
        }

        async fn start(&mut self, _callback: Arc<dyn RawDataCallback>) -> Result<()> {
            Err(ProtocolError::transport(TransportType::Bluetooth, "no adapter"))
        }

        async fn stop(&mut self) {}

        fn is_running(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_start_reports_failures_and_keeps_others() {
        let (mut manager, _recorder) = manager();
        let udp = crate::config::UdpListenerConfig {
            enabled: true,
            bind: "127.0.0.1:0".parse().unwrap(),
        };
        manager.add_listener(Box::new(FailingListener));
        manager.add_listener(Box::new(UdpNotificationListener::new(&udp)));

        let failures = manager.start().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].transport, TransportType::Bluetooth);
        assert_eq!(manager.running_transports(), vec![TransportType::Udp]);

        manager.stop().await;
        assert!(manager.running_transports().is_empty());
    }

    #[test]
    fn test_from_config_builds_enabled_listeners() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [listeners.udp]
            enabled = false

            [listeners.bluetooth]
            enabled = true

            [manager]
            recent_capacity = 7
            "#,
        )
        .unwrap();

        let recorder = Arc::new(Recorder::default());
        let manager = NotificationManager::from_config(&config, recorder.clone(), recorder, None);

        // TCP only: UDP disabled, Bluetooth has no radio
        assert_eq!(manager.listeners.len(), 1);
        assert_eq!(manager.listeners[0].transport(), TransportType::Tcp);
        assert_eq!(manager.core.recent_capacity(), 7);
    }
}
