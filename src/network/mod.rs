//! Network module
//!
//! Transport layer of the bridge.
//!
//! This module contains:
//! - `transport`: transport kinds, peer addresses and well-known ports/UUIDs
//! - `listener`: inbound transports (TCP, UDP, Bluetooth RFCOMM)
//! - `radio`: short-range radio backends used by the Bluetooth listener and sender
//! - `address_cache`: device id to last observed address

pub mod address_cache;
pub mod listener;
pub mod radio;
pub mod transport;

pub use address_cache::{AddressUpdate, DeviceAddressCache};

pub use listener::{
    BluetoothNotificationListener, NotificationListener, RawDataCallback,
    TcpNotificationListener, UdpNotificationListener,
};

pub use radio::{MemoryRadio, RadioBackend, ServiceRecord};

pub use transport::{
    AddressFamily, PeerAddress, TransportType, COMMAND_PORT, COMMAND_SERVICE_UUID,
    MAX_BT_UNIT_SIZE, MAX_UDP_DATAGRAM_SIZE, NOTIFICATION_PORT, NOTIFICATION_SERVICE_NAME,
    NOTIFICATION_SERVICE_UUID,
};
