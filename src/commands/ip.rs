//! IP command sender
//!
//! Connects to the command listener on the phone (TCP, port 10601 by default)
//! at the IP address its notifications last arrived from, writes one record
//! and closes the connection.

use super::sender::{CommandLink, QueueingSender};
use crate::config::IpSenderConfig;
use crate::network::{AddressFamily, DeviceAddressCache, PeerAddress, TransportType};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Sender over TCP to the phone's command port
pub type IpCommandSender = QueueingSender<IpLink>;

/// TCP link to the phone's command port
#[derive(Debug, Clone)]
pub struct IpLink {
    command_port: u16,
    connect_timeout: Duration,
}

impl IpLink {
    /// Link to `command_port` on whatever IP the phone was seen at
    pub fn new(command_port: u16, connect_timeout: Duration) -> Self {
        Self {
            command_port,
            connect_timeout,
        }
    }

    /// Link described by the IP sender section of the configuration
    pub fn from_config(config: &IpSenderConfig) -> Self {
        Self::new(config.command_port, config.connect_timeout())
    }

    /// Command endpoint for a device seen at `observed`
    ///
    /// Only the IP is kept; the observed source port belongs to the phone's
    /// outgoing socket.
    pub fn command_endpoint(&self, observed: SocketAddr) -> SocketAddr {
        SocketAddr::new(observed.ip(), self.command_port)
    }
}

#[async_trait]
impl CommandLink for IpLink {
    fn transport(&self) -> TransportType {
        TransportType::Tcp
    }

    fn family(&self) -> AddressFamily {
        AddressFamily::Ip
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn transmit(&self, address: &PeerAddress, record: &[u8]) -> io::Result<()> {
        let observed = address.as_ip().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("not an IP address: {}", address))
        })?;
        let endpoint = self.command_endpoint(observed);

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", endpoint),
                )
            })??;
        stream.write_all(record).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

impl QueueingSender<IpLink> {
    /// Create the IP sender described by `config`
    pub fn from_config(config: &IpSenderConfig, addresses: Arc<DeviceAddressCache>) -> Self {
        let sender = Self::new(IpLink::from_config(config), addresses);
        sender.set_enabled(config.enabled);
        sender
    }
}
