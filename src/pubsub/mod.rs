//! Pub/Sub transport contract
//!
//! ## Responsibilities
//!
//! - Topic + payload publishing
//! - Delivery of inbound messages to registered handlers
//! - Connection state reporting
//!
//! The broker connection itself (MQTT etc.) is an external collaborator; it
//! only has to implement [`PubSubTransport`]. [`LocalBus`] is the in-process
//! implementation used for single-host wiring and tests.
//!
//! No ordering is guaranteed across topics and there is no acknowledgement of
//! subscriber-side processing.

mod local_bus;

pub use local_bus::LocalBus;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Topic names shared by the camera, firmware and GPIO processes
pub mod topics {
    pub const POSITION_REQUEST: &str = "dakash/klipper/position/request";
    pub const POSITION_RESPONSE: &str = "dakash/klipper/position/response";
    pub const SENSOR_REQUEST: &str = "dakash/gpio/sensors/request";
    pub const SENSOR_STATUS: &str = "dakash/gpio/sensors/status";
    pub const LED_RED: &str = "dakash/gpio/led/red";
    pub const LED_GREEN: &str = "dakash/gpio/led/green";
    pub const LED_BLUE: &str = "dakash/gpio/led/blue";
    pub const CALIBRATION: &str = "dakash/camera/calibration";
    pub const TOOLS: &str = "dakash/camera/tools";
    pub const FIRMWARE_GCODE: &str = "dakash/klipper/gcode";
}

/// Inbound message
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Payload as trimmed UTF-8 (lossy)
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).trim().to_string()
    }

    /// Decode the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Handler invoked for every message on a subscribed topic. Transports may call
/// it from their own network thread, outside any async runtime. Handlers must
/// not block.
pub type MessageHandler = Arc<dyn Fn(&BusMessage) + Send + Sync>;

/// Publish/subscribe transport
pub trait PubSubTransport: Send + Sync {
    /// Publish a payload. Fails immediately when the transport is not connected;
    /// no internal retry.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Register a handler for an exact topic
    fn subscribe(&self, topic: &str, handler: MessageHandler);

    /// Whether the broker connection is currently up
    fn is_connected(&self) -> bool;

    /// Whether published messages only reach handlers in this process
    fn is_loopback(&self) -> bool {
        false
    }

    /// Publish a JSON-serialisable value
    fn publish_json(&self, topic: &str, value: &serde_json::Value) -> Result<()> {
        self.publish(topic, serde_json::to_vec(value)?)
    }
}
