//! Protocol module
//!
//! Records exchanged with the phone and the text wire codec.
//!
//! This module contains:
//! - `Notification`: events received from the phone
//! - `Command`: instructions sent to the phone
//! - `codec`: delimited-text encoding/decoding of both

pub mod codec;
pub mod command;
pub mod notification;

pub use codec::{decode_command, decode_notification, encode_command, encode_notification};
pub use command::{Command, CommandType};
pub use notification::{Notification, NotificationType};
