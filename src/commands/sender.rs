//! Command senders
//!
//! A sender delivers commands to phones over one outbound transport. The
//! dispatcher only sees the [`CommandSender`] capability; the transport
//! specifics live behind a [`CommandLink`], wrapped by [`QueueingSender`]
//! which adds the part every transport shares:
//!
//! 1. Queue the command for its device. Handing a command to a sender never
//!    waits on the network.
//! 2. Whenever the device's address is known (immediately, or when the
//!    [`DeviceAddressCache`](crate::network::DeviceAddressCache) announces
//!    it), the flusher task transmits everything queued for the device in
//!    FIFO order.
//!
//! Each device is flushed by its own task, so a phone that is slow to answer
//! only delays its own commands. Commands are encoded right before
//! transmission, never when queued. A command leaves its queue only once it
//! has been transmitted; a failure leaves it and everything behind it queued
//! for the next address update.

use super::pending::PendingCommands;
use crate::error::{ProtocolError, Result};
use crate::network::{AddressFamily, DeviceAddressCache, PeerAddress, TransportType};
use crate::protocol::{codec, Command};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to a command handed to a sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The device's address is known and the flusher was woken; this many
    /// commands (the command itself included) are on their way to it
    Sending(usize),
    /// Waiting for the device to be heard from; this many commands are
    /// queued for it
    Queued(usize),
}

/// Outbound transport as seen by the dispatcher
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Transport this sender writes to
    fn transport(&self) -> TransportType;

    /// Whether the transport is currently usable
    ///
    /// Says nothing about whether a particular device is reachable.
    fn is_enabled(&self) -> bool;

    /// Hand `command` over for delivery to its device
    ///
    /// Returns once the command is queued; transmission happens in the
    /// background.
    async fn send_command(&self, command: Command) -> Result<SendOutcome>;
}

/// Transport-specific half of a [`QueueingSender`]
#[async_trait]
pub trait CommandLink: Send + Sync + 'static {
    /// Transport written to
    fn transport(&self) -> TransportType;

    /// Address family looked up in the cache
    fn family(&self) -> AddressFamily;

    /// Whether the underlying transport is up
    fn is_available(&self) -> bool;

    /// Write one encoded record to the phone at `address`
    async fn transmit(&self, address: &PeerAddress, record: &[u8]) -> io::Result<()>;
}

type DeviceLock = Arc<tokio::sync::Mutex<()>>;

/// Sender queueing per device until the address cache can resolve it
pub struct QueueingSender<L> {
    link: L,
    addresses: Arc<DeviceAddressCache>,
    pending: PendingCommands,
    enabled: AtomicBool,
    // Held across a device's flush so its commands leave in order
    device_locks: Mutex<HashMap<String, DeviceLock>>,
    wake_tx: mpsc::UnboundedSender<String>,
    wake_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl<L: CommandLink> QueueingSender<L> {
    /// Create an enabled sender over `link`
    ///
    /// Nothing is transmitted until [`spawn_flusher`](Self::spawn_flusher)
    /// runs or [`flush`](Self::flush) is called.
    pub fn new(link: L, addresses: Arc<DeviceAddressCache>) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self {
            link,
            addresses,
            pending: PendingCommands::new(),
            enabled: AtomicBool::new(true),
            device_locks: Mutex::new(HashMap::new()),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
        }
    }

    /// Underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Turn the sender on or off (e.g. on network or radio state changes)
    ///
    /// Queued commands are kept while disabled and flushed once re-enabled.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was == enabled {
            return;
        }

        info!(
            "{} sender {}",
            self.link.transport(),
            if enabled { "enabled" } else { "disabled" }
        );
        if enabled {
            for device_id in self.pending.devices() {
                let _ = self.wake_tx.send(device_id);
            }
        }
    }

    /// Commands queued for `device_id`
    pub fn pending_count(&self, device_id: &str) -> usize {
        self.pending.len(device_id)
    }

    /// Commands queued across all devices
    pub fn total_pending(&self) -> usize {
        self.pending.total()
    }

    /// Transmit everything queued for `device_id` if its address is known
    ///
    /// Waits for a flush of the same device already in progress. Returns the
    /// number of commands delivered.
    pub async fn flush(&self, device_id: &str) -> usize {
        let lock = self.device_lock(device_id);
        let _guard = lock.lock().await;
        self.flush_locked(device_id).await
    }

    /// Flush every device with queued commands, one after the other
    pub async fn flush_all(&self) -> usize {
        let mut delivered = 0;
        for device_id in self.pending.devices() {
            delivered += self.flush(&device_id).await;
        }
        delivered
    }

    /// Spawn the task transmitting queued commands
    ///
    /// A device is flushed when a command is sent to it while its address is
    /// known, and whenever the cache learns an address for it. Every device
    /// gets its own flush task; at most one runs per device. The task is
    /// subscribed before this returns and runs until `cancel` fires, which
    /// also aborts flushes in progress (their commands stay queued).
    ///
    /// Only the first flusher of a sender is woken by `send_command`.
    pub fn spawn_flusher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let sender = Arc::clone(self);
        let mut updates = self.addresses.subscribe();
        let mut wakeups = self.wake_rx.lock().take();

        tokio::spawn(async move {
            let mut flushes = DeviceFlushes::default();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = updates.recv() => match update {
                        Ok(update) => {
                            if update.address.family() == sender.link.family()
                                && sender.pending_count(&update.device_id) > 0
                            {
                                flushes.request(&sender, update.device_id);
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(
                                "{} sender missed {} address updates, flushing all queues",
                                sender.link.transport(),
                                missed
                            );
                            for device_id in sender.pending.devices() {
                                flushes.request(&sender, device_id);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                    Some(device_id) = next_wakeup(&mut wakeups) => {
                        flushes.request(&sender, device_id);
                    }
                    Some(finished) = flushes.tasks.join_next(), if !flushes.tasks.is_empty() => {
                        flushes.finished(&sender, finished);
                    }
                }
            }

            flushes.tasks.shutdown().await;
            debug!("{} sender flusher stopped", sender.link.transport());
        })
    }

    fn device_lock(&self, device_id: &str) -> DeviceLock {
        self.device_locks
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    async fn flush_locked(&self, device_id: &str) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let Some(address) = self.addresses.lookup(device_id, self.link.family()) else {
            return 0;
        };

        let mut delivered = 0;
        while let Some(command) = self.pending.front(device_id) {
            let record = codec::encode_command_line(&command);
            match self.link.transmit(&address, &record).await {
                Ok(()) => {
                    self.pending.pop_front(device_id);
                    debug!(
                        "Sent {} via {} to {}",
                        command,
                        self.link.transport(),
                        address
                    );
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to send {} via {} to {}: {} ({} commands stay queued)",
                        command,
                        self.link.transport(),
                        address,
                        e,
                        self.pending.len(device_id)
                    );
                    break;
                }
            }
        }

        delivered
    }
}

/// Flush tasks owned by a flusher, at most one running per device
#[derive(Default)]
struct DeviceFlushes {
    tasks: JoinSet<String>,
    running: HashSet<String>,
    // Requested again while running; flushed once more afterwards
    again: HashSet<String>,
}

impl DeviceFlushes {
    fn request<L: CommandLink>(
        &mut self,
        sender: &Arc<QueueingSender<L>>,
        device_id: String,
    ) {
        if self.running.contains(&device_id) {
            self.again.insert(device_id);
            return;
        }

        self.running.insert(device_id.clone());
        let sender = Arc::clone(sender);
        self.tasks.spawn(async move {
            sender.flush(&device_id).await;
            device_id
        });
    }

    fn finished<L: CommandLink>(
        &mut self,
        sender: &Arc<QueueingSender<L>>,
        result: std::result::Result<String, tokio::task::JoinError>,
    ) {
        match result {
            Ok(device_id) => {
                self.running.remove(&device_id);
                if self.again.remove(&device_id) {
                    self.request(sender, device_id);
                }
            }
            Err(e) => {
                if e.is_panic() {
                    warn!(
                        "{} sender flush task panicked: {}",
                        sender.link.transport(),
                        e
                    );
                }
                // The device is unknown here; the per-device locks keep a
                // second flush in order
                self.running.clear();
            }
        }
    }
}

async fn next_wakeup(
    wakeups: &mut Option<mpsc::UnboundedReceiver<String>>,
) -> Option<String> {
    match wakeups {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl<L: CommandLink> CommandSender for QueueingSender<L> {
    fn transport(&self) -> TransportType {
        self.link.transport()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && self.link.is_available()
    }

    async fn send_command(&self, command: Command) -> Result<SendOutcome> {
        if !self.is_enabled() {
            return Err(ProtocolError::transport(
                self.link.transport(),
                "sender is disabled",
            ));
        }

        let device_id = command.device_id.clone();
        let queued = self.pending.push(command);

        if self.addresses.lookup(&device_id, self.link.family()).is_some() {
            // Fails only after the flusher has stopped
            let _ = self.wake_tx.send(device_id);
            Ok(SendOutcome::Sending(queued))
        } else {
            debug!(
                "{} command(s) for {} queued on {} sender",
                queued,
                device_id,
                self.link.transport()
            );
            Ok(SendOutcome::Queued(queued))
        }
    }
}
