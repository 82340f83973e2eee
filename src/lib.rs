//! notifier-bridge-core
//!
//! Protocol and routing layer bridging phone events to a desktop host.
//!
//! ## Architecture
//!
//! Phones send events (incoming call, SMS, battery, ping...) as one-line text
//! records over Bluetooth RFCOMM, TCP or UDP. The bridge decodes them,
//! suppresses re-deliveries and hands them to the host. In the other direction
//! the host issues commands (dial, hang up, send SMS, query) that travel back
//! over whichever transport is currently usable.
//!
//! ### Modules
//!
//! - `protocol`: `Notification`/`Command` records and the wire codec
//! - `network`: listeners, radio backends, device address cache
//! - `notifications`: the notification manager (decode, dedup, routing)
//! - `commands`: the command dispatcher and senders
//! - `config`: TOML configuration
//!
//! ## Example
//!
//! ```rust
//! use notifier_bridge_core::protocol::{codec, Command, CommandType, NotificationType};
//!
//! let record = b"phone-1|42|SMS|Running late|+15551234\n";
//! let notification = codec::decode_notification(record).unwrap();
//! assert_eq!(notification.notification_type, NotificationType::Sms);
//! assert_eq!(notification.data.as_deref(), Some("+15551234"));
//!
//! let reply = Command::with_id("phone-1", "c1", CommandType::SendSms, "+1555", "ok | see you");
//! assert_eq!(codec::encode_command(&reply), b"phone-1|c1|SEND_SMS|+1555|ok \\| see you");
//! ```

// Re-export commonly used types
pub use commands::{CommandDispatcher, CommandSender, SendOutcome};
pub use config::BridgeConfig;
pub use error::{DecodeError, ProtocolError, Result};
pub use network::{DeviceAddressCache, NotificationListener, PeerAddress, TransportType};
pub use notifications::{NotificationCallback, NotificationManager, PairingCallback};
pub use protocol::{Command, CommandType, Notification, NotificationType};

// Public modules
pub mod commands;
pub mod config;
pub mod error;
pub mod network;
pub mod notifications;
pub mod protocol;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
