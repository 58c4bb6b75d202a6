//! Dakash coordination service
//!
//! Main entry point: wires the bus, the camera-side components, the sensor
//! services and the Klipper bridge, then runs until Ctrl-C.

use dakash_coord::{
    pubsub::{LocalBus, PubSubTransport},
    state::{AppConfig, AppState},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dakash_coord=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Dakash coordination service v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        moonraker_url = config.moonraker_url.as_deref().unwrap_or("-"),
        escalation_mode = ?config.escalation_mode,
        gpio_enabled = config.gpio_enabled,
        klippy_serial = %config.klippy_serial_path.display(),
        "Configuration loaded"
    );

    let bus = LocalBus::start();
    let transport: Arc<dyn PubSubTransport> = bus.clone();
    let state = AppState::build(config, transport).await?;
    tracing::info!("Components initialized");

    state.sensor_poller.start().await;

    let calibration = state.calibration.snapshot().await;
    tracing::info!(
        reference_points = calibration.reference_points.len(),
        calibration_enabled = calibration.enabled,
        tools = state.tools.list().await.len(),
        bridge = state.position_responder.is_some(),
        firmware_reachable = state.firmware_reachable,
        "Service running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    state.sensor_poller.stop().await;
    tracing::info!(
        escalations = state.escalator.escalation_count(),
        published = bus.published_count(),
        "Dakash coordination service stopped"
    );
    Ok(())
}
