//! Dakash Coordination Library
//!
//! Cross-process coordination for the Dakash toolchanger: camera process,
//! printer firmware and GPIO sensor process, talking over pub/sub only.
//!
//! ## Architecture (9 Components)
//!
//! 1. PubSub - transport contract and in-process bus
//! 2. CorrelationClient - bounded-wait position queries over pub/sub
//! 3. CalibrationStore - pixel to machine mapping
//! 4. ToolRegistry - tool set and per-tool offsets
//! 5. Interlock - dock/carriage safety state machine
//! 6. FaultEscalation - pause-and-alert script to the firmware
//! 7. SensorPoller / SensorRequestService - periodic and on-demand sensor reads
//! 8. KlipperBridge - firmware-side position responder and command bridge
//! 9. DockCalibration - CoreXY dock location from stepper samples
//!
//! ## Design Principles
//!
//! - No globals: every component is an owned struct behind an `Arc` handle
//! - Nothing is process-fatal: failures degrade to cached data and a log line
//! - Persistence is whole-document JSON with atomic replace

pub mod blob_store;
pub mod calibration_store;
pub mod correlation_client;
pub mod dock_calibration;
pub mod error;
pub mod fault_escalation;
pub mod interlock;
pub mod klipper_bridge;
pub mod models;
pub mod pubsub;
pub mod sensor_poller;
pub mod sensor_service;
pub mod state;
pub mod tool_offsets;

pub use error::{Error, Result};
