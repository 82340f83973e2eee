//! Command Dispatcher
//!
//! Holds the senders in priority order and hands each command to the first
//! one whose transport is currently usable.
//!
//! ## Example
//!
//! ```rust
//! use notifier_bridge_core::commands::CommandDispatcher;
//! use notifier_bridge_core::error::ProtocolError;
//! use notifier_bridge_core::protocol::{Command, CommandType};
//!
//! # async fn example() {
//! let dispatcher = CommandDispatcher::new(Vec::new());
//! let command = Command::new("phone", CommandType::Dial, "+15551234", "");
//!
//! let err = dispatcher.dispatch(command).await.unwrap_err();
//! assert!(matches!(err, ProtocolError::NoTransportAvailable));
//! # }
//! ```

use super::bluetooth::BluetoothCommandSender;
use super::ip::IpCommandSender;
use super::sender::{CommandSender, SendOutcome};
use crate::config::{SenderKind, SendersConfig};
use crate::error::{ProtocolError, Result};
use crate::network::radio::RadioBackend;
use crate::network::{DeviceAddressCache, TransportType};
use crate::protocol::Command;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Routes commands to the first enabled sender
pub struct CommandDispatcher {
    senders: Vec<Arc<dyn CommandSender>>,
    cancel: CancellationToken,
    flushers: Vec<JoinHandle<()>>,
}

impl CommandDispatcher {
    /// Create a dispatcher over `senders`, highest priority first
    pub fn new(senders: Vec<Arc<dyn CommandSender>>) -> Self {
        Self {
            senders,
            cancel: CancellationToken::new(),
            flushers: Vec::new(),
        }
    }

    /// Build the senders listed in `config.order` and start their flushers
    ///
    /// Senders share `addresses` with the notification manager so commands
    /// queued for a device leave as soon as the device is heard from. The
    /// Bluetooth sender needs a radio and is skipped when `radio` is `None`.
    /// Must be called inside a Tokio runtime.
    pub fn from_config(
        config: &SendersConfig,
        addresses: Arc<DeviceAddressCache>,
        radio: Option<Arc<dyn RadioBackend>>,
    ) -> Self {
        let mut dispatcher = Self::new(Vec::new());

        for kind in &config.order {
            match kind {
                SenderKind::Ip => {
                    let sender = Arc::new(IpCommandSender::from_config(
                        &config.ip,
                        addresses.clone(),
                    ));
                    dispatcher
                        .flushers
                        .push(sender.spawn_flusher(dispatcher.cancel.child_token()));
                    dispatcher.senders.push(sender);
                }
                SenderKind::Bluetooth => match &radio {
                    Some(radio) => {
                        let sender = Arc::new(BluetoothCommandSender::from_config(
                            &config.bluetooth,
                            radio.clone(),
                            addresses.clone(),
                        ));
                        dispatcher
                            .flushers
                            .push(sender.spawn_flusher(dispatcher.cancel.child_token()));
                        dispatcher.senders.push(sender);
                    }
                    None => warn!("No radio available, Bluetooth sender disabled"),
                },
            }
        }

        info!(
            "Command dispatcher ready with senders: {:?}",
            dispatcher.transports()
        );
        dispatcher
    }

    /// Hand `command` to the first enabled sender
    ///
    /// # Errors
    ///
    /// - `ProtocolError::NoTransportAvailable` if no sender is enabled; no
    ///   sender is called
    /// - whatever the chosen sender returns
    pub async fn dispatch(&self, command: Command) -> Result<SendOutcome> {
        let Some(sender) = self.senders.iter().find(|s| s.is_enabled()) else {
            warn!("No transport available for {}", command);
            return Err(ProtocolError::NoTransportAvailable);
        };

        debug!("Dispatching {} via {}", command, sender.transport());
        sender.send_command(command).await
    }

    /// Senders in priority order
    pub fn senders(&self) -> &[Arc<dyn CommandSender>] {
        &self.senders
    }

    /// Transports of the senders in priority order
    pub fn transports(&self) -> Vec<TransportType> {
        self.senders.iter().map(|s| s.transport()).collect()
    }

    /// Stop the flush tasks started by [`from_config`](Self::from_config)
    ///
    /// Commands still queued stay queued; they are not delivered afterwards.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for flusher in self.flushers.drain(..) {
            if let Err(e) = flusher.await {
                if e.is_panic() {
                    warn!("Sender flush task panicked: {}", e);
                }
            }
        }
        debug!("Command dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::network::radio::MemoryRadio;
    use crate::protocol::CommandType;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeSender {
        transport: TransportType,
        enabled: AtomicBool,
        received: Mutex<Vec<Command>>,
    }

    impl FakeSender {
        fn new(transport: TransportType, enabled: bool) -> Arc<Self> {
            Arc::new(Self {
                transport,
                enabled: AtomicBool::new(enabled),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandSender for FakeSender {
        fn transport(&self) -> TransportType {
            self.transport
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        async fn send_command(&self, command: Command) -> Result<SendOutcome> {
            self.received.lock().push(command);
            Ok(SendOutcome::Sending(1))
        }
    }

    fn command() -> Command {
        Command::new("phone", CommandType::Dial, "+15551234", "")
    }

    #[tokio::test]
    async fn test_first_enabled_sender_wins() {
        let a = FakeSender::new(TransportType::Bluetooth, false);
        let b = FakeSender::new(TransportType::Tcp, true);
        let c = FakeSender::new(TransportType::Udp, true);
        let senders: Vec<Arc<dyn CommandSender>> = vec![a.clone(), b.clone(), c.clone()];
        let dispatcher = CommandDispatcher::new(senders);

        dispatcher.dispatch(command()).await.unwrap();

        assert!(a.received.lock().is_empty());
        assert_eq!(b.received.lock().len(), 1);
        assert!(c.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_none_enabled_reports_no_transport() {
        let a = FakeSender::new(TransportType::Bluetooth, false);
        let b = FakeSender::new(TransportType::Tcp, false);
        let senders: Vec<Arc<dyn CommandSender>> = vec![a.clone(), b.clone()];
        let dispatcher = CommandDispatcher::new(senders);

        let err = dispatcher.dispatch(command()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::NoTransportAvailable));
        assert!(a.received.lock().is_empty());
        assert!(b.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_enable_state_is_read_per_dispatch() {
        let a = FakeSender::new(TransportType::Bluetooth, true);
        let b = FakeSender::new(TransportType::Tcp, true);
        let senders: Vec<Arc<dyn CommandSender>> = vec![a.clone(), b.clone()];
        let dispatcher = CommandDispatcher::new(senders);

        dispatcher.dispatch(command()).await.unwrap();
        a.enabled.store(false, Ordering::SeqCst);
        dispatcher.dispatch(command()).await.unwrap();

        assert_eq!(a.received.lock().len(), 1);
        assert_eq!(b.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_from_config_follows_order() {
        let config = BridgeConfig::from_toml_str("[senders]\norder = [\"ip\", \"bluetooth\"]")
            .unwrap()
            .senders;
        let radio: Arc<dyn RadioBackend> = Arc::new(MemoryRadio::new());
        let mut dispatcher = CommandDispatcher::from_config(
            &config,
            Arc::new(DeviceAddressCache::new()),
            Some(radio),
        );
        assert_eq!(
            dispatcher.transports(),
            vec![TransportType::Tcp, TransportType::Bluetooth]
        );
        dispatcher.shutdown().await;

        let mut without_radio = CommandDispatcher::from_config(
            &config,
            Arc::new(DeviceAddressCache::new()),
            None,
        );
        assert_eq!(without_radio.transports(), vec![TransportType::Tcp]);
        without_radio.shutdown().await;
    }
}
