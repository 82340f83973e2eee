//! Notifications module
//!
//! Inbound side of the bridge: the manager that turns raw listener units into
//! deduplicated, routed [`Notification`](crate::protocol::Notification)s.
//!
//! This module contains:
//! - `NotificationManager`: listener aggregation, decode, dedup, fan-out
//! - `RecentNotifications`: bounded dedup window

pub mod dedup;
pub mod manager;

pub use dedup::RecentNotifications;
pub use manager::{
    ListenerFailure, ManagerStats, NotificationCallback, NotificationManager, PairingCallback,
};
