//! Firmware command channels
//!
//! One-way G-code line injection. No acknowledgement is read back.

use crate::error::{Error, Result};
use crate::pubsub::{topics, PubSubTransport};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One-way command channel into the printer firmware.
///
/// Implementations may block; callers run them off the async workers.
pub trait FirmwareChannel: Send + Sync {
    /// Send one G-code line
    fn send_command(&self, line: &str) -> Result<()>;

    /// Short label for logs
    fn name(&self) -> &'static str;
}

/// Klipper's pseudo-serial device (`/tmp/klippy_serial`)
#[derive(Debug, Clone)]
pub struct KlippySerialChannel {
    path: PathBuf,
}

impl KlippySerialChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FirmwareChannel for KlippySerialChannel {
    fn send_command(&self, line: &str) -> Result<()> {
        // Never create the device: a plain file would swallow commands silently
        let mut device = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                Error::Firmware(format!("cannot open {}: {}", self.path.display(), e))
            })?;
        device
            .write_all(format!("{}\n", line).as_bytes())
            .map_err(|e| Error::Firmware(format!("write to {} failed: {}", self.path.display(), e)))?;
        tracing::info!(command = %line, "Sent command to Klipper");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "klippy_serial"
    }
}

/// Forwards lines over the bus to a bridge with firmware access
pub struct BusCommandChannel {
    transport: Arc<dyn PubSubTransport>,
    topic: String,
}

impl BusCommandChannel {
    pub fn new(transport: Arc<dyn PubSubTransport>) -> Self {
        Self {
            transport,
            topic: topics::FIRMWARE_GCODE.to_string(),
        }
    }
}

impl FirmwareChannel for BusCommandChannel {
    fn send_command(&self, line: &str) -> Result<()> {
        self.transport.publish(&self.topic, line.as_bytes().to_vec())?;
        tracing::debug!(topic = %self.topic, command = %line, "Command forwarded over bus");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "bus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{BusMessage, LocalBus};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_serial_appends_lines() {
        let dir = TempDir::new().unwrap();
        let device = dir.path().join("klippy_serial");
        std::fs::write(&device, b"").unwrap();

        let channel = KlippySerialChannel::new(&device);
        channel.send_command("G28").unwrap();
        channel.send_command("M114").unwrap();
        assert_eq!(std::fs::read_to_string(&device).unwrap(), "G28\nM114\n");
    }

    #[test]
    fn test_serial_missing_device_is_error() {
        let dir = TempDir::new().unwrap();
        let channel = KlippySerialChannel::new(dir.path().join("klippy_serial"));
        let result = channel.send_command("G28");
        assert!(matches!(result, Err(Error::Firmware(_))));
        assert!(!channel.path().exists());
    }

    #[tokio::test]
    async fn test_bus_channel_publishes() {
        let bus = LocalBus::start();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            topics::FIRMWARE_GCODE,
            Arc::new(move |msg: &BusMessage| sink.lock().unwrap().push(msg.payload_str())),
        );

        BusCommandChannel::new(bus.clone()).send_command("PAUSE").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["PAUSE".to_string()]);
    }
}
