//! Notification records
//!
//! A [`Notification`] is one event reported by the phone: an incoming call,
//! an SMS, a battery level change, a pairing ping. It is created by the wire
//! codec when an inbound unit is decoded and is immutable afterwards.
//!
//! ## Example
//!
//! ```rust
//! use notifier_bridge_core::protocol::{Notification, NotificationType};
//!
//! let n = Notification::new("phone-1", "1f2e", NotificationType::Sms, "Hi there")
//!     .with_data("+15551234");
//!
//! assert_eq!(n.dedup_key(), ("phone-1", "1f2e"));
//! assert!(!n.is_pairing());
//! ```

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of event carried by a notification
///
/// The wire form is the upper-case variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// Incoming call
    Ring,
    /// Battery state change
    Battery,
    /// Text message
    Sms,
    /// Multimedia message
    Mms,
    /// New voicemail
    Voicemail,
    /// Connectivity test; also drives pairing
    Ping,
    /// User-generated event (e.g. from an automation app)
    User,
}

impl NotificationType {
    /// All notification types, in wire order
    pub const ALL: [NotificationType; 7] = [
        NotificationType::Ring,
        NotificationType::Battery,
        NotificationType::Sms,
        NotificationType::Mms,
        NotificationType::Voicemail,
        NotificationType::Ping,
        NotificationType::User,
    ];

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Ring => "RING",
            NotificationType::Battery => "BATTERY",
            NotificationType::Sms => "SMS",
            NotificationType::Mms => "MMS",
            NotificationType::Voicemail => "VOICEMAIL",
            NotificationType::Ping => "PING",
            NotificationType::User => "USER",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownType(s.to_string()))
    }
}

/// A decoded event from the phone
///
/// Equality covers every field, `data` included. Deduplication only looks at
/// [`Notification::dedup_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Stable identifier of the sending device
    #[serde(rename = "deviceId")]
    pub device_id: String,

    /// Identifier unique per event
    #[serde(rename = "notificationId")]
    pub notification_id: String,

    /// Event kind
    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    /// Human-readable text, possibly empty
    pub contents: String,

    /// Secondary machine-readable payload (caller number, battery level...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Notification {
    /// Create a notification without secondary data
    pub fn new(
        device_id: impl Into<String>,
        notification_id: impl Into<String>,
        notification_type: NotificationType,
        contents: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            notification_id: notification_id.into(),
            notification_type,
            contents: contents.into(),
            data: None,
        }
    }

    /// Builder: attach secondary data
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Key used by the notification manager to suppress re-deliveries
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.device_id, &self.notification_id)
    }

    /// Whether this notification belongs to the pairing sub-protocol
    pub fn is_pairing(&self) -> bool {
        self.notification_type == NotificationType::Ping
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} ({}): {}",
            self.notification_type, self.device_id, self.notification_id, self.contents
        )
    }
}
