//! Bluetooth command sender
//!
//! Opens an RFCOMM channel to the phone's command service at the hardware
//! address its notifications last arrived from. One channel per record.

use super::sender::{CommandLink, QueueingSender};
use crate::config::BluetoothSenderConfig;
use crate::network::radio::RadioBackend;
use crate::network::{AddressFamily, DeviceAddressCache, PeerAddress, TransportType};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Sender over RFCOMM to the phone's command service
pub type BluetoothCommandSender = QueueingSender<BluetoothLink>;

/// RFCOMM link through a radio backend
pub struct BluetoothLink {
    radio: Arc<dyn RadioBackend>,
    service_uuid: String,
}

impl BluetoothLink {
    /// Link connecting to `service_uuid` on the phone through `radio`
    pub fn new(radio: Arc<dyn RadioBackend>, service_uuid: impl Into<String>) -> Self {
        Self {
            radio,
            service_uuid: service_uuid.into(),
        }
    }

    /// Service UUID connected to on the phone
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }
}

#[async_trait]
impl CommandLink for BluetoothLink {
    fn transport(&self) -> TransportType {
        TransportType::Bluetooth
    }

    fn family(&self) -> AddressFamily {
        AddressFamily::Bluetooth
    }

    fn is_available(&self) -> bool {
        self.radio.is_powered()
    }

    async fn transmit(&self, address: &PeerAddress, record: &[u8]) -> io::Result<()> {
        let mac = address.as_bluetooth().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a Bluetooth address: {}", address),
            )
        })?;

        let mut channel = self.radio.connect(mac, &self.service_uuid).await?;
        channel.write_all(record).await?;
        channel.shutdown().await?;
        Ok(())
    }
}

impl QueueingSender<BluetoothLink> {
    /// Create the Bluetooth sender described by `config`
    pub fn from_config(
        config: &BluetoothSenderConfig,
        radio: Arc<dyn RadioBackend>,
        addresses: Arc<DeviceAddressCache>,
    ) -> Self {
        let sender = Self::new(BluetoothLink::new(radio, config.command_uuid.clone()), addresses);
        sender.set_enabled(config.enabled);
        sender
    }
}
