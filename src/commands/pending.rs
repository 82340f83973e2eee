//! Per-device pending command queues

use crate::protocol::Command;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Commands waiting for their device to become reachable, in enqueue order
#[derive(Debug, Default)]
pub struct PendingCommands {
    queues: Mutex<HashMap<String, VecDeque<Command>>>,
}

impl PendingCommands {
    /// Create with no queued commands
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command to its device's queue and return the queue length
    pub fn push(&self, command: Command) -> usize {
        let mut queues = self.queues.lock();
        let queue = queues.entry(command.device_id.clone()).or_default();
        queue.push_back(command);
        queue.len()
    }

    /// Oldest command queued for `device_id`, left in place
    pub fn front(&self, device_id: &str) -> Option<Command> {
        self.queues
            .lock()
            .get(device_id)
            .and_then(|queue| queue.front().cloned())
    }

    /// Drop the oldest command queued for `device_id` once it has been sent
    pub fn pop_front(&self, device_id: &str) -> Option<Command> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(device_id)?;
        let command = queue.pop_front();
        if queue.is_empty() {
            queues.remove(device_id);
        }
        command
    }

    /// Commands queued for `device_id`
    pub fn len(&self, device_id: &str) -> usize {
        self.queues.lock().get(device_id).map_or(0, VecDeque::len)
    }

    /// Commands queued across all devices
    pub fn total(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    /// Whether no device has queued commands
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Devices with at least one queued command
    pub fn devices(&self) -> Vec<String> {
        self.queues
            .lock()
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(device, _)| device.clone())
            .collect()
    }
}
