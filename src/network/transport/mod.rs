//! Transport types and addresses
//!
//! This module names the transports the bridge speaks over and the addresses
//! those transports observe for a device.
//!
//! ## Transport Types
//!
//! - **Bluetooth**: RFCOMM channels (short-range radio)
//! - **TCP**: newline-framed streams on the local network
//! - **UDP**: one datagram per record on the local network
//!
//! A device can be reachable over several transports at once; the
//! [`DeviceAddressCache`](crate::network::DeviceAddressCache) keeps one
//! [`PeerAddress`] per transport family.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Default port for notifications over TCP and UDP
pub const NOTIFICATION_PORT: u16 = 10600;

/// Default port of the command listener running on the phone
pub const COMMAND_PORT: u16 = 10601;

/// RFCOMM service UUID the phone connects to when sending notifications
pub const NOTIFICATION_SERVICE_UUID: &str = "7674047e-6e47-4bf0-831f-209e3f9dd23f";

/// RFCOMM service UUID of the phone's command listener
pub const COMMAND_SERVICE_UUID: &str = "e8d515b4-47c1-4813-b6d6-3eab32f8953e";

/// Advertised RFCOMM service name
pub const NOTIFICATION_SERVICE_NAME: &str = "AndroidNotifierService";

/// Maximum size of one radio unit (64 KiB)
pub const MAX_BT_UNIT_SIZE: usize = 64 * 1024;

/// Maximum size of one UDP datagram
pub const MAX_UDP_DATAGRAM_SIZE: usize = 65_507;

/// Transport kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// Bluetooth RFCOMM
    Bluetooth,
    /// TCP stream
    Tcp,
    /// UDP datagram
    Udp,
}

impl TransportType {
    /// Lower-case name, as used in configuration and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Bluetooth => "bluetooth",
            TransportType::Tcp => "tcp",
            TransportType::Udp => "udp",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Family of a peer address
///
/// TCP and UDP share one family: a device seen over either is reachable by IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// Radio hardware address
    Bluetooth,
    /// IP socket address
    Ip,
}

/// Address a listener observed for the sender of a raw unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddress {
    /// Radio hardware address, e.g. `00:11:22:33:44:55`
    Bluetooth(String),
    /// IP source address
    Ip(SocketAddr),
}

impl PeerAddress {
    /// Address family, used as the cache key alongside the device id
    pub fn family(&self) -> AddressFamily {
        match self {
            PeerAddress::Bluetooth(_) => AddressFamily::Bluetooth,
            PeerAddress::Ip(_) => AddressFamily::Ip,
        }
    }

    /// Radio hardware address, if this is one
    pub fn as_bluetooth(&self) -> Option<&str> {
        match self {
            PeerAddress::Bluetooth(mac) => Some(mac),
            PeerAddress::Ip(_) => None,
        }
    }

    /// IP socket address, if this is one
    pub fn as_ip(&self) -> Option<SocketAddr> {
        match self {
            PeerAddress::Ip(addr) => Some(*addr),
            PeerAddress::Bluetooth(_) => None,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddress::Bluetooth(mac) => write!(f, "bt://{}", mac),
            PeerAddress::Ip(addr) => write!(f, "ip://{}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_names() {
        assert_eq!(TransportType::Bluetooth.to_string(), "bluetooth");
        assert_eq!(
            serde_json::to_string(&TransportType::Udp).unwrap(),
            r#""udp""#
        );
    }

    #[test]
    fn test_peer_address_family() {
        let bt = PeerAddress::Bluetooth("00:11:22:33:44:55".to_string());
        let ip = PeerAddress::Ip("192.168.1.20:40000".parse().unwrap());

        assert_eq!(bt.family(), AddressFamily::Bluetooth);
        assert_eq!(ip.family(), AddressFamily::Ip);
        assert_eq!(bt.as_bluetooth(), Some("00:11:22:33:44:55"));
        assert_eq!(bt.as_ip(), None);
        assert_eq!(ip.to_string(), "ip://192.168.1.20:40000");
    }
}
