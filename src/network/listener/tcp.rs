//! TCP notification listener
//!
//! Accepts connections on the local network. Each connection carries a stream
//! of newline-terminated records; every line is forwarded as one raw unit.
//! Connections are served concurrently and one failing connection never stops
//! the accept loop.

use super::{trim_terminator, ListenerTask, NotificationListener, RawDataCallback, ACCEPT_BACKOFF};
use crate::config::TcpListenerConfig;
use crate::error::{ProtocolError, Result};
use crate::network::{PeerAddress, TransportType};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-connection limits
#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    idle_timeout: Duration,
    max_line_length: usize,
}

/// Listener for newline-framed records over TCP
pub struct TcpNotificationListener {
    bind: SocketAddr,
    limits: ConnectionLimits,
    local_addr: Option<SocketAddr>,
    task: Option<ListenerTask>,
}

impl TcpNotificationListener {
    /// Create a listener from its configuration
    pub fn new(config: &TcpListenerConfig) -> Self {
        Self {
            bind: config.bind,
            limits: ConnectionLimits {
                idle_timeout: config.idle_timeout(),
                max_line_length: config.max_line_length,
            },
            local_addr: None,
            task: None,
        }
    }
}

#[async_trait]
impl NotificationListener for TcpNotificationListener {
    fn transport(&self) -> TransportType {
        TransportType::Tcp
    }

    async fn start(&mut self, callback: Arc<dyn RawDataCallback>) -> Result<()> {
        if self.task.is_some() {
            warn!("TCP listener already started");
            return Ok(());
        }

        let listener = TcpListener::bind(self.bind).await.map_err(|e| {
            ProtocolError::transport(
                TransportType::Tcp,
                format!("failed to bind {}: {}", self.bind, e),
            )
        })?;
        self.local_addr = listener.local_addr().ok();
        info!(
            "Listening for notifications over TCP on {}",
            self.local_addr.unwrap_or(self.bind)
        );

        let limits = self.limits;
        self.task = Some(ListenerTask::spawn(move |cancel| {
            accept_loop(listener, callback, limits, cancel)
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.shutdown(TransportType::Tcp).await;
            self.local_addr = None;
            info!("TCP listener stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

async fn accept_loop(
    listener: TcpListener,
    callback: Arc<dyn RawDataCallback>,
    limits: ConnectionLimits,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted TCP connection from {}", peer);
                    connections.spawn(serve_connection(stream, peer, callback.clone(), limits));
                }
                Err(e) => {
                    warn!("TCP accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        warn!("TCP connection task panicked: {}", e);
                    }
                }
            }
        }
    }

    // Aborts in-flight connections and waits for them
    connections.shutdown().await;
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    callback: Arc<dyn RawDataCallback>,
    limits: ConnectionLimits,
) {
    let origin = PeerAddress::Ip(peer);
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    // One extra byte so a maximal line still fits its terminator
    let read_limit = limits.max_line_length as u64 + 1;

    loop {
        line.clear();
        let mut limited = (&mut reader).take(read_limit);
        let read = match tokio::time::timeout(
            limits.idle_timeout,
            limited.read_until(b'\n', &mut line),
        )
        .await
        {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("TCP connection from {} failed: {}", peer, e);
                break;
            }
            Err(_) => {
                debug!("TCP connection from {} idle, closing", peer);
                break;
            }
        };

        if read == 0 {
            break;
        }
        if line.last() != Some(&b'\n') && line.len() > limits.max_line_length {
            warn!(
                "TCP line from {} exceeds {} bytes, closing connection",
                peer, limits.max_line_length
            );
            break;
        }

        let unit = trim_terminator(&line);
        if !unit.is_empty() {
            callback.on_raw_data(unit, &origin);
        }
    }

    debug!("TCP connection from {} closed", peer);
}
