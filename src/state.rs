//! Application state
//!
//! Holds all shared components and the configuration they were built from

use crate::blob_store::BlobStore;
use crate::calibration_store::CalibrationStore;
use crate::correlation_client::{MoonrakerClient, PositionClient};
use crate::error::{Error, Result};
use crate::fault_escalation::{BusCommandChannel, FaultEscalator, FirmwareChannel, KlippySerialChannel};
use crate::interlock::{EscalationMode, InterlockReading};
use crate::klipper_bridge::{CommandBridge, PositionResponder};
use crate::pubsub::PubSubTransport;
use crate::sensor_poller::{
    BusIndicator, GpiodIndicator, GpiodReader, Indicator, PollerConfig, SensorPoller,
    SensorReader, SimulatedSensor,
};
use crate::sensor_service::SensorRequestService;
use crate::tool_offsets::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Calibration and tool documents
    pub data_dir: PathBuf,
    /// Moonraker base URL; enables the HTTP position path and the position responder
    pub moonraker_url: Option<String>,
    pub position_timeout: Duration,
    pub sensor_poll_interval: Duration,
    pub sensor_republish: Duration,
    pub worker_join_timeout: Duration,
    pub escalation_mode: EscalationMode,
    /// Klipper pseudo-serial device; used directly when present on this host
    pub klippy_serial_path: PathBuf,
    /// `None` auto-detects
    pub gpio_chip: Option<String>,
    pub gpio_enabled: bool,
    pub pin_dock_sensor: u32,
    pub pin_carriage_sensor: u32,
    pub pin_red_led: u32,
    pub pin_green_led: u32,
    pub pin_blue_led: u32,
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_escalation_mode() -> EscalationMode {
    let Ok(value) = std::env::var("ESCALATION_MODE") else {
        return EscalationMode::default();
    };
    parse_escalation_mode(&value)
}

fn parse_escalation_mode(value: &str) -> EscalationMode {
    match value.parse() {
        Ok(mode) => mode,
        Err(e) => {
            let fallback = EscalationMode::default();
            tracing::warn!(error = %e, fallback = ?fallback, "Invalid ESCALATION_MODE ignored");
            fallback
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::var("DAKASH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/home/pi/calibration")),
            moonraker_url: std::env::var("MOONRAKER_URL").ok().filter(|s| !s.is_empty()),
            position_timeout: Duration::from_millis(env_u64("POSITION_TIMEOUT_MS", 5000)),
            sensor_poll_interval: Duration::from_millis(env_u64("SENSOR_POLL_MS", 100)),
            sensor_republish: Duration::from_secs(env_u64("SENSOR_REPUBLISH_SECS", 30)),
            worker_join_timeout: Duration::from_millis(env_u64("WORKER_JOIN_TIMEOUT_MS", 2000)),
            escalation_mode: env_escalation_mode(),
            klippy_serial_path: std::env::var("KLIPPY_SERIAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/klippy_serial")),
            gpio_chip: std::env::var("GPIO_CHIP").ok().filter(|s| !s.is_empty()),
            gpio_enabled: std::env::var("GPIO_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            pin_dock_sensor: env_u32("PIN_DOCK_SENSOR", 24),
            pin_carriage_sensor: env_u32("PIN_CARRIAGE_SENSOR", 23),
            pin_red_led: env_u32("PIN_RED_LED", 17),
            pin_green_led: env_u32("PIN_GREEN_LED", 27),
            pin_blue_led: env_u32("PIN_BLUE_LED", 22),
        }
    }
}

impl AppConfig {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.sensor_poll_interval,
            republish_every: self.sensor_republish,
            join_timeout: self.worker_join_timeout,
            escalation_mode: self.escalation_mode,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub transport: Arc<dyn PubSubTransport>,
    pub position: Arc<PositionClient>,
    pub calibration: Arc<CalibrationStore>,
    pub tools: Arc<ToolRegistry>,
    pub escalator: Arc<FaultEscalator>,
    pub sensor_poller: Arc<SensorPoller>,
    pub sensor_service: Arc<SensorRequestService>,
    pub position_responder: Option<Arc<PositionResponder>>,
    /// Whether escalation commands can reach a firmware: a local serial
    /// device, or a transport that leaves this process
    pub firmware_reachable: bool,
}

impl AppState {
    /// Build every component and attach the bus endpoints
    pub async fn build(config: AppConfig, transport: Arc<dyn PubSubTransport>) -> Result<Self> {
        let blobs = BlobStore::new(config.data_dir.clone());

        let moonraker = match &config.moonraker_url {
            Some(url) => Some(MoonrakerClient::new(url.clone(), config.position_timeout)?),
            None => None,
        };

        let mut position = PositionClient::new(transport.clone(), config.position_timeout);
        if let Some(client) = &moonraker {
            position = position.with_http(client.clone());
        }
        let position = Arc::new(position);

        let calibration = Arc::new(CalibrationStore::load(blobs.clone(), transport.clone()).await);
        let tools = Arc::new(ToolRegistry::load(blobs, transport.clone()).await);

        let local_firmware = config.klippy_serial_path.exists();
        let channel: Arc<dyn FirmwareChannel> = if local_firmware {
            Arc::new(KlippySerialChannel::new(config.klippy_serial_path.clone()))
        } else {
            Arc::new(BusCommandChannel::new(transport.clone()))
        };
        tracing::info!(channel = channel.name(), "Firmware command channel selected");
        let firmware_reachable = local_firmware || !transport.is_loopback();
        if !firmware_reachable {
            if config.gpio_enabled {
                return Err(Error::Config(format!(
                    "no firmware path for fault escalation: {} is missing and the transport is in-process",
                    config.klippy_serial_path.display()
                )));
            }
            tracing::error!(
                serial = %config.klippy_serial_path.display(),
                "No firmware path: escalation commands will not reach the printer"
            );
        }
        let escalator = Arc::new(FaultEscalator::new(channel.clone()));

        if local_firmware {
            // The bridge task lives for the whole process
            drop(CommandBridge::new(transport.clone(), channel).attach());
        }

        let reader: Arc<dyn SensorReader>;
        let indicator: Arc<dyn Indicator>;
        if config.gpio_enabled {
            reader = Arc::new(GpiodReader::open(
                config.gpio_chip.clone(),
                config.pin_dock_sensor,
                config.pin_carriage_sensor,
            )?);
            indicator = Arc::new(GpiodIndicator::open(
                config.gpio_chip.clone(),
                config.pin_red_led,
                config.pin_green_led,
                config.pin_blue_led,
            )?);
        } else {
            tracing::warn!("GPIO disabled, using simulated docked sensors");
            reader = Arc::new(SimulatedSensor::new(InterlockReading::new(true, false)));
            indicator = Arc::new(BusIndicator::new(transport.clone()));
        }

        let sensor_poller = Arc::new(SensorPoller::new(
            reader.clone(),
            indicator.clone(),
            escalator.clone(),
            transport.clone(),
            config.poller_config(),
        ));

        let mut sensor_service =
            SensorRequestService::new(reader, escalator.clone(), transport.clone());
        if config.gpio_enabled {
            sensor_service = sensor_service.with_indicator(indicator);
        }
        let sensor_service = Arc::new(sensor_service);
        sensor_service.attach();

        let position_responder = moonraker.map(|client| {
            let responder = Arc::new(PositionResponder::new(transport.clone(), client));
            responder.attach();
            responder
        });

        Ok(Self {
            config,
            transport,
            position,
            calibration,
            tools,
            escalator,
            sensor_poller,
            sensor_service,
            position_responder,
            firmware_reachable,
        })
    }
}
