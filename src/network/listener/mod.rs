//! Notification listeners
//!
//! A listener owns one inbound transport and turns whatever arrives on it into
//! discrete raw units handed to a [`RawDataCallback`]. Framing and discovery
//! are each implementation's private concern:
//!
//! - [`TcpNotificationListener`]: one unit per newline-terminated line
//! - [`UdpNotificationListener`]: one unit per datagram
//! - [`BluetoothNotificationListener`]: one unit per RFCOMM channel
//!
//! ## Lifecycle
//!
//! 1. `start(callback)` binds/advertises and spawns the receive loop. Bind or
//!    advertise failures are returned here, once.
//! 2. The loop invokes the callback for every complete unit, possibly from
//!    several connection tasks at the same time.
//! 3. `stop()` cancels the loop, closes every socket and waits for the tasks
//!    to finish. Once it returns the callback is never invoked again.

mod bluetooth;
mod tcp;
mod udp;

pub use bluetooth::BluetoothNotificationListener;
pub use tcp::TcpNotificationListener;
pub use udp::UdpNotificationListener;

use crate::error::Result;
use crate::network::{PeerAddress, TransportType};
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Pause after a failed accept before trying again
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Receiver of raw inbound units
///
/// Invoked synchronously from listener tasks and must be safe to call from
/// several of them at once. Implementations must not block.
pub trait RawDataCallback: Send + Sync {
    /// Handle one complete unit received from `origin`
    fn on_raw_data(&self, data: &[u8], origin: &PeerAddress);
}

/// One inbound transport
#[async_trait]
pub trait NotificationListener: Send + Sync {
    /// Transport served by this listener
    fn transport(&self) -> TransportType;

    /// Start receiving and forward every unit to `callback`
    ///
    /// Starting a running listener is a no-op.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Transport` if the transport cannot be bound or advertised.
    async fn start(&mut self, callback: Arc<dyn RawDataCallback>) -> Result<()>;

    /// Stop receiving and release every transport resource
    ///
    /// Idempotent.
    async fn stop(&mut self);

    /// Whether the receive loop is running
    fn is_running(&self) -> bool;

    /// Socket address actually bound, for IP listeners that are running
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Receive loop spawned by a listener, with its cancellation handle
pub(crate) struct ListenerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ListenerTask {
    /// Spawn `body`, handing it the token that will signal shutdown
    pub(crate) fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(body(cancel.clone()));
        Self { cancel, handle }
    }

    /// Whether the loop has ended on its own
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait until it has torn everything down
    pub(crate) async fn shutdown(self, transport: TransportType) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("{} listener task panicked: {}", transport, e);
            }
        }
    }
}

/// Strip one trailing line terminator from a unit
pub(crate) fn trim_terminator(mut unit: &[u8]) -> &[u8] {
    if let Some(rest) = unit.strip_suffix(b"\n") {
        unit = rest;
    }
    unit.strip_suffix(b"\r").unwrap_or(unit)
}
