//! Short-range radio backends
//!
//! The Bluetooth listener and sender talk to the radio through
//! [`RadioBackend`], which covers the three things they need: whether the
//! radio is usable, advertising a service that phones connect to, and opening
//! an outbound channel to a phone's service.
//!
//! Backends:
//! - [`MemoryRadio`]: in-process radio, channels are `tokio::io::duplex` pipes
//! - `BluezRadio` (feature `bluez`): BlueZ RFCOMM profiles via `bluer`

#[cfg(feature = "bluez")]
mod bluez;

#[cfg(feature = "bluez")]
pub use bluez::BluezRadio;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::mpsc;

/// Inbound half of a radio channel
pub type RadioReader = Box<dyn AsyncRead + Send + Unpin>;

/// Outbound half of a radio channel
pub type RadioWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Service advertised to phones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Human-readable service name
    pub name: String,
    /// Service class UUID
    pub uuid: String,
    /// Fixed RFCOMM channel, if any
    pub channel: Option<u8>,
}

/// Channel opened by a phone
pub struct RadioChannel {
    /// Hardware address of the phone
    pub peer: String,
    /// Data sent by the phone
    pub stream: RadioReader,
}

/// Source of inbound channels for one advertised service
///
/// Dropping the acceptor withdraws the service.
#[async_trait]
pub trait RadioAcceptor: Send {
    /// Wait for the next inbound channel
    ///
    /// `io::ErrorKind::BrokenPipe` means the service is gone for good.
    async fn accept(&mut self) -> io::Result<RadioChannel>;
}

/// Access to a local radio adapter
#[async_trait]
pub trait RadioBackend: Send + Sync {
    /// Whether the adapter is present and powered
    fn is_powered(&self) -> bool;

    /// Advertise `service` and return the source of its inbound channels
    async fn advertise(&self, service: &ServiceRecord) -> io::Result<Box<dyn RadioAcceptor>>;

    /// Open a channel to the service `service_uuid` on the phone at `address`
    async fn connect(&self, address: &str, service_uuid: &str) -> io::Result<RadioWriter>;
}

const MEMORY_CHANNEL_BUFFER: usize = 16 * 1024;

/// In-process radio
///
/// Phones are simulated by the test or demo code: [`MemoryRadio::open_channel`]
/// plays a phone connecting to the advertised service, and
/// [`MemoryRadio::received`] shows what outbound channels delivered to a
/// given phone address.
pub struct MemoryRadio {
    powered: AtomicBool,
    advertised: Mutex<Option<(ServiceRecord, mpsc::UnboundedSender<RadioChannel>)>>,
    reachable: Mutex<HashSet<String>>,
    delivered: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
}

impl MemoryRadio {
    /// Create a powered radio with no reachable phones
    pub fn new() -> Self {
        Self {
            powered: AtomicBool::new(true),
            advertised: Mutex::new(None),
            reachable: Mutex::new(HashSet::new()),
            delivered: Mutex::new(HashMap::new()),
        }
    }

    /// Power the radio on or off
    pub fn set_powered(&self, powered: bool) {
        self.powered.store(powered, Ordering::SeqCst);
    }

    /// Make `address` accept or refuse outbound channels
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut set = self.reachable.lock();
        if reachable {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    /// Drop the advertised service as if the adapter had unregistered it
    ///
    /// The listener's acceptor reports the service as gone.
    pub fn revoke_service(&self) {
        self.advertised.lock().take();
    }

    /// Currently advertised service, if any
    pub fn advertised_service(&self) -> Option<ServiceRecord> {
        self.advertised
            .lock()
            .as_ref()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(record, _)| record.clone())
    }

    /// Connect to the advertised service as the phone at `peer`
    ///
    /// Returns the phone's end of the channel; whatever is written to it and
    /// followed by a shutdown is one unit for the listener.
    pub fn open_channel(&self, peer: &str) -> io::Result<DuplexStream> {
        let advertised = self.advertised.lock();
        let (_, tx) = advertised.as_ref().ok_or_else(not_advertised)?;

        let (phone, host) = tokio::io::duplex(MEMORY_CHANNEL_BUFFER);
        tx.send(RadioChannel {
            peer: peer.to_string(),
            stream: Box::new(host),
        })
        .map_err(|_| not_advertised())?;
        Ok(phone)
    }

    /// Bytes delivered so far over outbound channels to `address`
    pub fn received(&self, address: &str) -> Vec<u8> {
        self.delivered
            .lock()
            .get(address)
            .map(|buf| buf.lock().clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryRadio {
    fn default() -> Self {
        Self::new()
    }
}

fn not_advertised() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionRefused, "service not advertised")
}

fn powered_off() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "radio is powered off")
}

struct MemoryAcceptor {
    channels: mpsc::UnboundedReceiver<RadioChannel>,
}

#[async_trait]
impl RadioAcceptor for MemoryAcceptor {
    async fn accept(&mut self) -> io::Result<RadioChannel> {
        self.channels
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "radio went away"))
    }
}

/// Writer appending into a shared buffer
struct SinkWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for SinkWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.lock().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl RadioBackend for MemoryRadio {
    fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    async fn advertise(&self, service: &ServiceRecord) -> io::Result<Box<dyn RadioAcceptor>> {
        if !self.is_powered() {
            return Err(powered_off());
        }

        let mut advertised = self.advertised.lock();
        if let Some((_, tx)) = advertised.as_ref() {
            if !tx.is_closed() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "a service is already advertised",
                ));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *advertised = Some((service.clone(), tx));
        Ok(Box::new(MemoryAcceptor { channels: rx }))
    }

    async fn connect(&self, address: &str, _service_uuid: &str) -> io::Result<RadioWriter> {
        if !self.is_powered() {
            return Err(powered_off());
        }
        if !self.reachable.lock().contains(address) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} is not reachable", address),
            ));
        }

        let buf = self
            .delivered
            .lock()
            .entry(address.to_string())
            .or_default()
            .clone();
        Ok(Box::new(SinkWriter { buf }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn record() -> ServiceRecord {
        ServiceRecord {
            name: "Test".to_string(),
            uuid: "7674047e-6e47-4bf0-831f-209e3f9dd23f".to_string(),
            channel: Some(1),
        }
    }

    #[tokio::test]
    async fn test_channel_reaches_acceptor() {
        let radio = MemoryRadio::new();
        let mut acceptor = radio.advertise(&record()).await.unwrap();
        assert_eq!(radio.advertised_service(), Some(record()));

        let mut phone = radio.open_channel("AA:BB:CC:DD:EE:FF").unwrap();
        phone.write_all(b"hello").await.unwrap();
        phone.shutdown().await.unwrap();

        let mut channel = acceptor.accept().await.unwrap();
        assert_eq!(channel.peer, "AA:BB:CC:DD:EE:FF");
        let mut data = Vec::new();
        channel.stream.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_dropping_acceptor_withdraws_service() {
        let radio = MemoryRadio::new();
        let acceptor = radio.advertise(&record()).await.unwrap();
        assert!(radio.advertise(&record()).await.is_err());

        drop(acceptor);
        assert!(radio.advertised_service().is_none());
        assert!(radio.open_channel("AA:BB:CC:DD:EE:FF").is_err());
        assert!(radio.advertise(&record()).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoked_service_breaks_acceptor() {
        let radio = MemoryRadio::new();
        let mut acceptor = radio.advertise(&record()).await.unwrap();

        radio.revoke_service();
        let err = acceptor.accept().await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(radio.advertised_service().is_none());
    }

    #[tokio::test]
    async fn test_connect_requires_power_and_reachability() {
        let radio = MemoryRadio::new();
        assert!(radio.connect("11:22:33:44:55:66", "uuid").await.is_err());

        radio.set_reachable("11:22:33:44:55:66", true);
        let mut writer = radio.connect("11:22:33:44:55:66", "uuid").await.unwrap();
        writer.write_all(b"cmd\n").await.unwrap();
        assert_eq!(radio.received("11:22:33:44:55:66"), b"cmd\n");

        radio.set_powered(false);
        assert!(radio.connect("11:22:33:44:55:66", "uuid").await.is_err());
        assert!(radio.advertise(&record()).await.is_err());
    }
}
