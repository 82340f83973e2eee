//! Bridge configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or no
//! file at all) yields a working setup: TCP and UDP listeners on port 10600,
//! the radio listener disabled, commands sent over Bluetooth first and IP
//! second.
//!
//! ```toml
//! [listeners.tcp]
//! bind = "0.0.0.0:10600"
//!
//! [listeners.bluetooth]
//! enabled = true
//!
//! [senders]
//! order = ["ip", "bluetooth"]
//!
//! [manager]
//! recent_capacity = 20
//! ```

use crate::error::{ProtocolError, Result};
use crate::network::transport::{
    COMMAND_PORT, COMMAND_SERVICE_UUID, MAX_BT_UNIT_SIZE, NOTIFICATION_PORT,
    NOTIFICATION_SERVICE_NAME, NOTIFICATION_SERVICE_UUID,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

/// Default size of the dedup window
pub const DEFAULT_RECENT_CAPACITY: usize = 20;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Inbound transports
    pub listeners: ListenersConfig,
    /// Outbound transports
    pub senders: SendersConfig,
    /// Notification manager tuning
    pub manager: ManagerConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Inbound transports
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenersConfig {
    pub tcp: TcpListenerConfig,
    pub udp: UdpListenerConfig,
    pub bluetooth: BluetoothListenerConfig,
}

/// TCP notification listener
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TcpListenerConfig {
    pub enabled: bool,
    /// Bind address
    pub bind: SocketAddr,
    /// Close a connection after this long without a complete line
    pub idle_timeout_secs: u64,
    /// Longest accepted line; longer lines drop the connection
    pub max_line_length: usize,
}

impl TcpListenerConfig {
    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: any_address(NOTIFICATION_PORT),
            idle_timeout_secs: 30,
            max_line_length: 64 * 1024,
        }
    }
}

/// UDP notification listener
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpListenerConfig {
    pub enabled: bool,
    /// Bind address
    pub bind: SocketAddr,
}

impl Default for UdpListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: any_address(NOTIFICATION_PORT),
        }
    }
}

/// Bluetooth RFCOMM notification listener
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BluetoothListenerConfig {
    pub enabled: bool,
    /// Advertised service name
    pub service_name: String,
    /// Advertised service UUID
    pub service_uuid: String,
    /// RFCOMM channel; the radio stack picks one when unset
    pub channel: Option<u8>,
    /// Give up on a channel that has not closed after this long
    pub read_timeout_secs: u64,
    /// Largest accepted unit
    pub max_unit_size: usize,
}

impl BluetoothListenerConfig {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for BluetoothListenerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: NOTIFICATION_SERVICE_NAME.to_string(),
            service_uuid: NOTIFICATION_SERVICE_UUID.to_string(),
            channel: Some(1),
            read_timeout_secs: 10,
            max_unit_size: MAX_BT_UNIT_SIZE,
        }
    }
}

/// Outbound sender kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    /// RFCOMM to the phone's command service
    Bluetooth,
    /// TCP to the phone's command port
    Ip,
}

/// Outbound transports
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SendersConfig {
    /// Dispatcher priority, first enabled sender wins
    pub order: Vec<SenderKind>,
    pub ip: IpSenderConfig,
    pub bluetooth: BluetoothSenderConfig,
}

impl Default for SendersConfig {
    fn default() -> Self {
        Self {
            order: vec![SenderKind::Bluetooth, SenderKind::Ip],
            ip: IpSenderConfig::default(),
            bluetooth: BluetoothSenderConfig::default(),
        }
    }
}

/// IP command sender
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IpSenderConfig {
    pub enabled: bool,
    /// Port of the phone's command listener
    pub command_port: u16,
    pub connect_timeout_secs: u64,
}

impl IpSenderConfig {
    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for IpSenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command_port: COMMAND_PORT,
            connect_timeout_secs: 5,
        }
    }
}

/// Bluetooth command sender
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BluetoothSenderConfig {
    pub enabled: bool,
    /// Service UUID of the phone's command listener
    pub command_uuid: String,
}

impl Default for BluetoothSenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command_uuid: COMMAND_SERVICE_UUID.to_string(),
        }
    }
}

/// Notification manager tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Number of recent (device, notification) ids kept for dedup
    pub recent_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            recent_capacity: DEFAULT_RECENT_CAPACITY,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error, or a full
    /// `tracing_subscriber::EnvFilter` expression)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Io` if the file cannot be read
    /// - `ProtocolError::Config` if it does not parse or fails validation
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.manager.recent_capacity == 0 {
            return Err(ProtocolError::config(
                "manager.recent_capacity must be at least 1",
            ));
        }
        if self.listeners.tcp.max_line_length == 0 {
            return Err(ProtocolError::config(
                "listeners.tcp.max_line_length must be at least 1",
            ));
        }
        if self.listeners.bluetooth.max_unit_size == 0 {
            return Err(ProtocolError::config(
                "listeners.bluetooth.max_unit_size must be at least 1",
            ));
        }
        for (i, kind) in self.senders.order.iter().enumerate() {
            if self.senders.order[..i].contains(kind) {
                return Err(ProtocolError::config(format!(
                    "senders.order lists {:?} more than once",
                    kind
                )));
            }
        }
        Ok(())
    }
}

fn any_address(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
}
