//! BlueZ radio backend
//!
//! RFCOMM over BlueZ profiles: advertising registers a server profile (which
//! publishes the SDP record), outbound channels register a client profile and
//! ask BlueZ to connect it to the phone.

use super::{RadioAcceptor, RadioBackend, RadioChannel, RadioWriter, ServiceRecord};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, ReqError, Role, Stream};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, Session, Uuid};
use futures::StreamExt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default BlueZ adapter
///
/// The power state follows the adapter's property change events for as long
/// as the radio is alive.
pub struct BluezRadio {
    session: Session,
    adapter: Adapter,
    powered: Arc<AtomicBool>,
    power_watch: JoinHandle<()>,
}

impl BluezRadio {
    /// Open a session on the default adapter
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn new() -> io::Result<Self> {
        let session = Session::new().await.map_err(io::Error::other)?;
        let adapter = session.default_adapter().await.map_err(io::Error::other)?;
        let powered = Arc::new(AtomicBool::new(
            adapter.is_powered().await.map_err(io::Error::other)?,
        ));
        info!(
            "Using Bluetooth adapter {} (powered: {})",
            adapter.name(),
            powered.load(Ordering::SeqCst)
        );

        let power_watch = tokio::spawn(watch_power(adapter.clone(), powered.clone()));
        Ok(Self {
            session,
            adapter,
            powered,
            power_watch,
        })
    }
}

impl Drop for BluezRadio {
    fn drop(&mut self) {
        self.power_watch.abort();
    }
}

async fn watch_power(adapter: Adapter, powered: Arc<AtomicBool>) {
    let events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Cannot watch Bluetooth adapter power state: {}", e);
            return;
        }
    };
    // Changes made before the subscription took effect
    if let Ok(now) = adapter.is_powered().await {
        record_power(&powered, now);
    }

    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        apply_adapter_event(&powered, &event);
    }
    warn!("Bluetooth adapter events ended, power state is no longer tracked");
}

/// Record a power change carried by `event`
fn apply_adapter_event(powered: &AtomicBool, event: &AdapterEvent) {
    if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(now)) = event {
        record_power(powered, *now);
    }
}

fn record_power(powered: &AtomicBool, now: bool) {
    if powered.swap(now, Ordering::SeqCst) != now {
        info!("Bluetooth adapter powered {}", if now { "on" } else { "off" });
    }
}

fn parse_uuid(uuid: &str) -> io::Result<Uuid> {
    uuid.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("bad UUID {}: {}", uuid, e),
        )
    })
}

struct BluezAcceptor {
    handle: ProfileHandle,
}

#[async_trait]
impl RadioAcceptor for BluezAcceptor {
    async fn accept(&mut self) -> io::Result<RadioChannel> {
        let request = self.handle.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "profile was unregistered")
        })?;
        let peer = request.device().to_string();
        let stream = request.accept().map_err(io::Error::other)?;
        Ok(RadioChannel {
            peer,
            stream: Box::new(stream),
        })
    }
}

#[async_trait]
impl RadioBackend for BluezRadio {
    fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    async fn advertise(&self, service: &ServiceRecord) -> io::Result<Box<dyn RadioAcceptor>> {
        let profile = Profile {
            uuid: parse_uuid(&service.uuid)?,
            name: Some(service.name.clone()),
            channel: service.channel.map(u16::from),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let handle = self
            .session
            .register_profile(profile)
            .await
            .map_err(io::Error::other)?;
        info!("Advertising RFCOMM service '{}' ({})", service.name, service.uuid);

        Ok(Box::new(BluezAcceptor { handle }))
    }

    async fn connect(&self, address: &str, service_uuid: &str) -> io::Result<RadioWriter> {
        let addr: Address = address.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bad Bluetooth address {}: {}", address, e),
            )
        })?;
        let uuid = parse_uuid(service_uuid)?;

        let profile = Profile {
            uuid,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self
            .session
            .register_profile(profile)
            .await
            .map_err(io::Error::other)?;
        let device = self.adapter.device(addr).map_err(io::Error::other)?;

        let connect = async {
            let mut requested = false;
            loop {
                tokio::select! {
                    result = device.connect_profile(&uuid), if !requested => {
                        result.map_err(io::Error::other)?;
                        requested = true;
                    }
                    request = handle.next() => {
                        let request = request.ok_or_else(|| {
                            io::Error::new(io::ErrorKind::BrokenPipe, "profile was unregistered")
                        })?;
                        if request.device() == addr {
                            return request.accept().map_err(io::Error::other);
                        }
                        warn!("Rejecting unexpected RFCOMM connection from {}", request.device());
                        request.reject(ReqError::Rejected);
                    }
                }
            }
        };

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "RFCOMM connect timed out"))??;
        debug!("RFCOMM channel open to {}", address);

        Ok(Box::new(ClientChannel {
            stream,
            _profile: handle,
        }))
    }
}

/// Outbound stream; keeps the client profile registered while it is open
struct ClientChannel {
    stream: Stream,
    _profile: ProfileHandle,
}

impl AsyncWrite for ClientChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_follows_adapter_events() {
        let powered = AtomicBool::new(true);

        apply_adapter_event(
            &powered,
            &AdapterEvent::PropertyChanged(AdapterProperty::Powered(false)),
        );
        assert!(!powered.load(Ordering::SeqCst));

        apply_adapter_event(
            &powered,
            &AdapterEvent::PropertyChanged(AdapterProperty::Discoverable(true)),
        );
        assert!(!powered.load(Ordering::SeqCst));

        apply_adapter_event(
            &powered,
            &AdapterEvent::PropertyChanged(AdapterProperty::Powered(true)),
        );
        assert!(powered.load(Ordering::SeqCst));
    }
}
