//! notifier-bridged
//!
//! Runs the bridge from a TOML configuration file:
//!
//! ```text
//! notifier-bridged [CONFIG]
//! ```
//!
//! Every delivered notification is printed to stdout as one JSON line for a
//! desktop front-end to consume. Commands are read from stdin, one JSON
//! object per line (`{"deviceId": "...", "type": "DIAL", "data1": "...", "data2": ""}`),
//! and dispatched to the phone.

use notifier_bridge_core::commands::CommandDispatcher;
use notifier_bridge_core::config::BridgeConfig;
use notifier_bridge_core::network::radio::RadioBackend;
use notifier_bridge_core::notifications::{
    NotificationCallback, NotificationManager, PairingCallback,
};
use notifier_bridge_core::protocol::{Command, CommandType, Notification};
use notifier_bridge_core::{ProtocolError, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Prints each notification as a JSON line
struct JsonLinesOutput;

impl NotificationCallback for JsonLinesOutput {
    fn on_notification(&self, notification: &Notification) {
        match serde_json::to_string(notification) {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(e) = writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
                    warn!("Failed to write notification: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize {}: {}", notification, e),
        }
    }
}

/// Pairs a device on its first PING
struct PairOnPing {
    paired: Mutex<HashSet<String>>,
}

impl PairingCallback for PairOnPing {
    fn on_pairing_notification(&self, notification: &Notification) {
        if self.paired.lock().insert(notification.device_id.clone()) {
            info!("Paired with device {}", notification.device_id);
        } else {
            info!("Ping from paired device {}", notification.device_id);
        }
    }

    fn is_paired(&self, device_id: &str) -> bool {
        self.paired.lock().contains(device_id)
    }
}

/// Command as read from stdin
#[derive(Debug, Deserialize)]
struct CommandRequest {
    #[serde(rename = "deviceId")]
    device_id: String,
    #[serde(rename = "type")]
    command_type: CommandType,
    #[serde(default)]
    data1: String,
    #[serde(default)]
    data2: String,
}

fn load_config() -> Result<BridgeConfig> {
    match std::env::args().nth(1) {
        Some(path) => BridgeConfig::load(Path::new(&path)),
        None => Ok(BridgeConfig::default()),
    }
}

fn init_logging(config: &BridgeConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| ProtocolError::Other(format!("Failed to initialize logging: {}", e)))
}

#[cfg(feature = "bluez")]
async fn open_radio() -> Option<Arc<dyn RadioBackend>> {
    match notifier_bridge_core::network::radio::BluezRadio::new().await {
        Ok(radio) => Some(Arc::new(radio)),
        Err(e) => {
            warn!("Bluetooth unavailable: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "bluez"))]
async fn open_radio() -> Option<Arc<dyn RadioBackend>> {
    None
}

async fn dispatch_line(dispatcher: &CommandDispatcher, line: &str) {
    let request: CommandRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Ignoring command line: {}", e);
            return;
        }
    };

    let command = Command::new(
        request.device_id,
        request.command_type,
        request.data1,
        request.data2,
    );
    let description = command.to_string();
    match dispatcher.dispatch(command).await {
        Ok(outcome) => info!("{}: {:?}", description, outcome),
        Err(e) => warn!("{}: {}", description, e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    init_logging(&config)?;
    info!("notifier-bridged {}", notifier_bridge_core::VERSION);

    let radio = open_radio().await;
    let pairing = Arc::new(PairOnPing {
        paired: Mutex::new(HashSet::new()),
    });

    let mut manager = NotificationManager::from_config(
        &config,
        Arc::new(JsonLinesOutput),
        pairing,
        radio.clone(),
    );
    let failures = manager.start().await;
    if manager.running_transports().is_empty() {
        error!("No listener could be started ({} failed)", failures.len());
        return Err(ProtocolError::other("no listener running"));
    }

    let mut dispatcher =
        CommandDispatcher::from_config(&config.senders, manager.address_cache(), radio);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to wait for Ctrl-C: {}", e);
                }
                break;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    dispatch_line(&dispatcher, &line).await;
                }
                Ok(Some(_)) => {}
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    info!("Shutting down");
    manager.stop().await;
    dispatcher.shutdown().await;
    Ok(())
}
