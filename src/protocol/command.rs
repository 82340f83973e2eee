//! Command records
//!
//! Commands travel from the desktop to the phone. They are created through
//! [`Command::new`], handed to the dispatcher, and forgotten once a sender has
//! taken them; there is no acknowledgement in this layer.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Instruction sent to the phone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    /// Place a call; `data1` is the number
    Dial,
    /// End the current call
    Hangup,
    /// Send a text message; `data1` is the number, `data2` the body
    SendSms,
    /// Ask the phone for state
    Query,
}

impl CommandType {
    /// All command types, in wire order
    pub const ALL: [CommandType; 4] = [
        CommandType::Dial,
        CommandType::Hangup,
        CommandType::SendSms,
        CommandType::Query,
    ];

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Dial => "DIAL",
            CommandType::Hangup => "HANGUP",
            CommandType::SendSms => "SEND_SMS",
            CommandType::Query => "QUERY",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownType(s.to_string()))
    }
}

/// A command addressed to one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Target device
    #[serde(rename = "deviceId")]
    pub device_id: String,

    /// Issuer-generated id, used to correlate future responses
    #[serde(rename = "commandId")]
    pub command_id: String,

    /// What to do
    #[serde(rename = "type")]
    pub command_type: CommandType,

    /// Primary argument (phone number), possibly empty
    pub data1: String,

    /// Secondary argument (message body), possibly empty
    pub data2: String,
}

impl Command {
    /// Create a command with a freshly generated id
    ///
    /// # Example
    ///
    /// ```rust
    /// use notifier_bridge_core::protocol::{Command, CommandType};
    ///
    /// let cmd = Command::new("phone-1", CommandType::SendSms, "+15551234", "On my way");
    /// assert_eq!(cmd.device_id, "phone-1");
    /// assert!(!cmd.command_id.is_empty());
    /// ```
    pub fn new(
        device_id: impl Into<String>,
        command_type: CommandType,
        data1: impl Into<String>,
        data2: impl Into<String>,
    ) -> Self {
        Self::with_id(
            device_id,
            Uuid::new_v4().simple().to_string(),
            command_type,
            data1,
            data2,
        )
    }

    /// Create a command with an explicit id
    pub fn with_id(
        device_id: impl Into<String>,
        command_id: impl Into<String>,
        command_type: CommandType,
        data1: impl Into<String>,
        data2: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            command_id: command_id.into(),
            command_type,
            data1: data1.into(),
            data2: data2.into(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {} ({})",
            self.command_type, self.device_id, self.command_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_differ() {
        let a = Command::new("d", CommandType::Hangup, "", "");
        let b = Command::new("d", CommandType::Hangup, "", "");
        assert_ne!(a.command_id, b.command_id);
        assert_eq!(a.command_id.len(), 32);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(CommandType::SendSms.as_str(), "SEND_SMS");
        assert_eq!("QUERY".parse::<CommandType>().unwrap(), CommandType::Query);
        assert!(matches!(
            "SMS".parse::<CommandType>(),
            Err(DecodeError::UnknownType(_))
        ));
    }

    #[test]
    fn test_display() {
        let cmd = Command::with_id("phone", "c1", CommandType::Dial, "555", "");
        assert_eq!(cmd.to_string(), "DIAL to phone (c1)");
    }
}
