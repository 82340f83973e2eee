//! UDP notification listener
//!
//! Every datagram is one raw unit.

use super::{trim_terminator, ListenerTask, NotificationListener, RawDataCallback};
use crate::config::UdpListenerConfig;
use crate::error::{ProtocolError, Result};
use crate::network::transport::MAX_UDP_DATAGRAM_SIZE;
use crate::network::{PeerAddress, TransportType};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Listener for one-record-per-datagram UDP
pub struct UdpNotificationListener {
    bind: SocketAddr,
    local_addr: Option<SocketAddr>,
    task: Option<ListenerTask>,
}

impl UdpNotificationListener {
    /// Create a listener from its configuration
    pub fn new(config: &UdpListenerConfig) -> Self {
        Self {
            bind: config.bind,
            local_addr: None,
            task: None,
        }
    }
}

#[async_trait]
impl NotificationListener for UdpNotificationListener {
    fn transport(&self) -> TransportType {
        TransportType::Udp
    }

    async fn start(&mut self, callback: Arc<dyn RawDataCallback>) -> Result<()> {
        if self.task.is_some() {
            warn!("UDP listener already started");
            return Ok(());
        }

        let socket = UdpSocket::bind(self.bind).await.map_err(|e| {
            ProtocolError::transport(
                TransportType::Udp,
                format!("failed to bind {}: {}", self.bind, e),
            )
        })?;
        self.local_addr = socket.local_addr().ok();
        info!(
            "Listening for notifications over UDP on {}",
            self.local_addr.unwrap_or(self.bind)
        );

        self.task = Some(ListenerTask::spawn(move |cancel| {
            receive_loop(socket, callback, cancel)
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.shutdown(TransportType::Udp).await;
            self.local_addr = None;
            info!("UDP listener stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

async fn receive_loop(
    socket: UdpSocket,
    callback: Arc<dyn RawDataCallback>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_UDP_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    debug!("Received {} byte datagram from {}", len, peer);
                    let unit = trim_terminator(&buf[..len]);
                    if !unit.is_empty() {
                        callback.on_raw_data(unit, &PeerAddress::Ip(peer));
                    }
                }
                // ICMP errors from earlier sends surface here; keep going
                Err(e) => warn!("UDP receive failed: {}", e),
            },
        }
    }
}
