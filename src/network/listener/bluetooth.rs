//! Bluetooth notification listener
//!
//! Advertises the notification service on the radio and accepts RFCOMM
//! channels from phones. A phone opens a channel, writes one record and closes
//! it, so the whole buffer received on a channel is one raw unit.

use super::{
    trim_terminator, ListenerTask, NotificationListener, RawDataCallback, ACCEPT_BACKOFF,
};
use crate::config::BluetoothListenerConfig;
use crate::error::{ProtocolError, Result};
use crate::network::radio::{RadioAcceptor, RadioBackend, RadioChannel, ServiceRecord};
use crate::network::{PeerAddress, TransportType};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct ChannelLimits {
    read_timeout: Duration,
    max_unit_size: usize,
}

/// Listener for notifications over RFCOMM
pub struct BluetoothNotificationListener {
    radio: Arc<dyn RadioBackend>,
    service: ServiceRecord,
    limits: ChannelLimits,
    task: Option<ListenerTask>,
}

impl BluetoothNotificationListener {
    /// Create a listener advertising on `radio`
    pub fn new(radio: Arc<dyn RadioBackend>, config: &BluetoothListenerConfig) -> Self {
        Self {
            radio,
            service: ServiceRecord {
                name: config.service_name.clone(),
                uuid: config.service_uuid.clone(),
                channel: config.channel,
            },
            limits: ChannelLimits {
                read_timeout: config.read_timeout(),
                max_unit_size: config.max_unit_size,
            },
            task: None,
        }
    }

    /// Service this listener advertises
    pub fn service(&self) -> &ServiceRecord {
        &self.service
    }
}

#[async_trait]
impl NotificationListener for BluetoothNotificationListener {
    fn transport(&self) -> TransportType {
        TransportType::Bluetooth
    }

    async fn start(&mut self, callback: Arc<dyn RawDataCallback>) -> Result<()> {
        if self.is_running() {
            warn!("Bluetooth listener already started");
            return Ok(());
        }
        // A loop that ended on its own is replaced
        if let Some(task) = self.task.take() {
            task.shutdown(TransportType::Bluetooth).await;
        }

        if !self.radio.is_powered() {
            return Err(ProtocolError::transport(
                TransportType::Bluetooth,
                "radio is powered off",
            ));
        }

        let acceptor = self.radio.advertise(&self.service).await.map_err(|e| {
            ProtocolError::transport(
                TransportType::Bluetooth,
                format!("failed to advertise '{}': {}", self.service.name, e),
            )
        })?;
        info!(
            "Listening for notifications over Bluetooth as '{}'",
            self.service.name
        );

        let limits = self.limits;
        self.task = Some(ListenerTask::spawn(move |cancel| {
            accept_loop(acceptor, callback, limits, cancel)
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.shutdown(TransportType::Bluetooth).await;
            info!("Bluetooth listener stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

async fn accept_loop(
    mut acceptor: Box<dyn RadioAcceptor>,
    callback: Arc<dyn RawDataCallback>,
    limits: ChannelLimits,
    cancel: CancellationToken,
) {
    let mut channels = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = acceptor.accept() => match accepted {
                Ok(channel) => {
                    debug!("Accepted RFCOMM channel from {}", channel.peer);
                    channels.spawn(read_channel(channel, callback.clone(), limits));
                }
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    warn!("Bluetooth notification service withdrawn: {}", e);
                    break;
                }
                Err(e) => {
                    warn!("RFCOMM accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(finished) = channels.join_next(), if !channels.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        warn!("RFCOMM channel task panicked: {}", e);
                    }
                }
            }
        }
    }

    channels.shutdown().await;
    // Withdraws the advertised service
    drop(acceptor);
}

async fn read_channel(
    channel: RadioChannel,
    callback: Arc<dyn RawDataCallback>,
    limits: ChannelLimits,
) {
    let RadioChannel { peer, stream } = channel;
    let mut data = Vec::new();
    let mut limited = stream.take(limits.max_unit_size as u64 + 1);

    match tokio::time::timeout(limits.read_timeout, limited.read_to_end(&mut data)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            warn!("RFCOMM channel from {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("RFCOMM channel from {} did not close in time, dropping", peer);
            return;
        }
    }

    if data.len() > limits.max_unit_size {
        warn!(
            "RFCOMM unit from {} exceeds {} bytes, dropping",
            peer, limits.max_unit_size
        );
        return;
    }

    let unit = trim_terminator(&data);
    if !unit.is_empty() {
        callback.on_raw_data(unit, &PeerAddress::Bluetooth(peer));
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Collector;
    use super::*;
    use crate::network::radio::MemoryRadio;
    use tokio::io::AsyncWriteExt;

    fn config() -> BluetoothListenerConfig {
        BluetoothListenerConfig {
            enabled: true,
            read_timeout_secs: 5,
            max_unit_size: 32,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_channel_buffer_is_one_unit() {
        let radio = Arc::new(MemoryRadio::new());
        let (collector, mut rx) = Collector::new();
        let mut listener = BluetoothNotificationListener::new(radio.clone(), &config());
        listener.start(collector.clone()).await.unwrap();

        let mut phone = radio.open_channel("AA:BB:CC:DD:EE:FF").unwrap();
        phone.write_all(b"phone|1|RING").await.unwrap();
        phone.write_all(b"|Call\n").await.unwrap();
        phone.shutdown().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"phone|1|RING|Call");
        assert_eq!(
            collector.units.lock()[0].1,
            PeerAddress::Bluetooth("AA:BB:CC:DD:EE:FF".to_string())
        );

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_unit_is_dropped() {
        let radio = Arc::new(MemoryRadio::new());
        let (collector, mut rx) = Collector::new();
        let mut listener = BluetoothNotificationListener::new(radio.clone(), &config());
        listener.start(collector.clone()).await.unwrap();

        let mut big = radio.open_channel("AA:BB:CC:DD:EE:01").unwrap();
        big.write_all(&[b'x'; 100]).await.unwrap();
        big.shutdown().await.unwrap();

        let mut small = radio.open_channel("AA:BB:CC:DD:EE:02").unwrap();
        small.write_all(b"ok").await.unwrap();
        small.shutdown().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"ok");
        listener.stop().await;
        assert_eq!(collector.units.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_powered_off_radio_fails_start() {
        let radio = Arc::new(MemoryRadio::new());
        radio.set_powered(false);
        let (collector, _rx) = Collector::new();
        let mut listener = BluetoothNotificationListener::new(radio, &config());

        let err = listener.start(collector).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Transport {
                transport: TransportType::Bluetooth,
                ..
            }
        ));
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_stop_withdraws_service() {
        let radio = Arc::new(MemoryRadio::new());
        let (collector, _rx) = Collector::new();
        let mut listener = BluetoothNotificationListener::new(radio.clone(), &config());
        listener.start(collector).await.unwrap();
        assert!(radio.advertised_service().is_some());

        listener.stop().await;
        assert!(radio.advertised_service().is_none());
        assert!(radio.open_channel("AA:BB:CC:DD:EE:FF").is_err());
    }

    #[tokio::test]
    async fn test_withdrawn_service_ends_listener() {
        let radio = Arc::new(MemoryRadio::new());
        let (collector, _rx) = Collector::new();
        let mut listener = BluetoothNotificationListener::new(radio.clone(), &config());
        listener.start(collector.clone()).await.unwrap();

        radio.revoke_service();
        tokio::time::timeout(Duration::from_secs(5), async {
            while listener.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Starting again advertises afresh
        listener.start(collector).await.unwrap();
        assert!(listener.is_running());
        assert!(radio.advertised_service().is_some());
        listener.stop().await;
    }
}
