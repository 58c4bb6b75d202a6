//! End-to-end scenarios across components

use dakash_coord::blob_store::BlobStore;
use dakash_coord::calibration_store::CalibrationStore;
use dakash_coord::fault_escalation::{FaultEscalator, FirmwareChannel, PAUSE_COMMAND};
use dakash_coord::interlock::{InterlockReading, InterlockState};
use dakash_coord::models::{Point2, Point3};
use dakash_coord::pubsub::LocalBus;
use dakash_coord::sensor_poller::{BusIndicator, PollerConfig, SensorPoller, SimulatedSensor};
use dakash_coord::tool_offsets::{Tool, ToolKind, ToolRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingFirmware {
    lines: Mutex<Vec<String>>,
}

impl FirmwareChannel for RecordingFirmware {
    fn send_command(&self, line: &str) -> dakash_coord::Result<()> {
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[tokio::test]
async fn test_pixel_click_maps_to_machine_coordinates() {
    let dir = TempDir::new().unwrap();
    let bus = LocalBus::start();
    let store = CalibrationStore::load(BlobStore::new(dir.path()), bus).await;

    store
        .add_reference_point(100, 100, Point3::new(50.0, 50.0, 10.0))
        .await
        .unwrap();
    store.set_scale(10.0, 10.0).await.unwrap();
    store.enable().await;

    let conversion = store.pixel_to_machine(110.0, 90.0).await.unwrap();
    assert_eq!(conversion.machine_x, 50.1);
    assert_eq!(conversion.machine_y, 50.1);
}

#[tokio::test]
async fn test_z_offset_from_mounting_heights() {
    let dir = TempDir::new().unwrap();
    let bus = LocalBus::start();
    let registry = ToolRegistry::load(BlobStore::new(dir.path()), bus).await;

    let reference = Tool {
        is_reference: true,
        programmed_position: Some(Point3::new(0.0, 0.0, 5.0)),
        ..Tool::new(0, "Camera", ToolKind::Camera)
    };
    let extruder = Tool {
        programmed_position: Some(Point3::new(100.0, 100.0, 8.0)),
        actual_position: Some(Point2::new(100.0, 100.0)),
        z_trim: 0.2,
        ..Tool::new(1, "Extruder 1", ToolKind::Extruder)
    };
    registry.save_tools(vec![reference, extruder]).await.unwrap();

    let offset = registry.compute_offset(1).await.unwrap().unwrap();
    assert_eq!(offset.z, -2.8);
}

#[tokio::test]
async fn test_conflicting_sensors_pause_once() {
    let bus = LocalBus::start();
    let firmware = Arc::new(RecordingFirmware::default());
    let escalator = Arc::new(FaultEscalator::new(firmware.clone()).with_spacing(Duration::from_millis(1)));
    let poller = SensorPoller::new(
        Arc::new(SimulatedSensor::new(InterlockReading::new(false, false))),
        Arc::new(BusIndicator::new(bus.clone())),
        escalator.clone(),
        bus,
        PollerConfig::default(),
    );

    let first = poller.poll_once().await.unwrap();
    assert_eq!(first.state, InterlockState::Conflicting);
    for _ in 0..5 {
        poller.poll_once().await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let lines = firmware.lines.lock().unwrap().clone();
    assert_eq!(lines.iter().filter(|l| *l == PAUSE_COMMAND).count(), 1);
    assert_eq!(escalator.escalation_count(), 1);
}
