//! Commands module
//!
//! Outbound side of the bridge: commands issued on the desktop travel to the
//! phone through the first enabled sender.
//!
//! This module contains:
//! - `CommandDispatcher`: priority-ordered sender selection
//! - `QueueingSender`: per-device queueing and address resolution shared by
//!   every transport
//! - `IpLink` / `BluetoothLink`: TCP and RFCOMM delivery

pub mod bluetooth;
pub mod dispatcher;
pub mod ip;
pub mod pending;
pub mod sender;

pub use bluetooth::{BluetoothCommandSender, BluetoothLink};
pub use dispatcher::CommandDispatcher;
pub use ip::{IpCommandSender, IpLink};
pub use pending::PendingCommands;
pub use sender::{CommandLink, CommandSender, QueueingSender, SendOutcome};
