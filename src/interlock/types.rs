//! Interlock types

use crate::error::{Error, Result};
use crate::models::unix_timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Raw dock/carriage sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlockReading {
    pub dock_present: bool,
    pub carriage_present: bool,
}

impl InterlockReading {
    pub fn new(dock_present: bool, carriage_present: bool) -> Self {
        Self {
            dock_present,
            carriage_present,
        }
    }

    /// Classify the reading. Pure: same input, same state.
    pub fn classify(&self) -> InterlockState {
        match (self.dock_present, self.carriage_present) {
            (true, false) => InterlockState::Docked,
            (false, true) => InterlockState::OnCarriage,
            (true, true) => InterlockState::Detached,
            (false, false) => InterlockState::Conflicting,
        }
    }
}

/// Toolchanger safety state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterlockState {
    Docked,
    OnCarriage,
    Detached,
    Conflicting,
}

impl InterlockState {
    pub fn is_fault(&self) -> bool {
        matches!(self, InterlockState::Detached | InterlockState::Conflicting)
    }

    /// Operator-facing reason for the fault states
    pub fn fault_reason(&self) -> Option<&'static str> {
        match self {
            InterlockState::Detached => {
                Some("Camera detached - not detected in dock or on carriage")
            }
            InterlockState::Conflicting => {
                Some("Impossible sensor state - camera detected in both dock and carriage")
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterlockState::Docked => "DOCKED",
            InterlockState::OnCarriage => "ON_CARRIAGE",
            InterlockState::Detached => "DETACHED",
            InterlockState::Conflicting => "CONFLICTING",
        }
    }
}

impl fmt::Display for InterlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a fault state triggers escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationMode {
    /// Once per entry into a fault state
    #[default]
    Edge,
    /// On every poll that observes a fault state
    Level,
}

impl FromStr for EscalationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge" => Ok(EscalationMode::Edge),
            "level" => Ok(EscalationMode::Level),
            other => Err(Error::Config(format!(
                "unknown escalation mode '{}' (expected edge or level)",
                other
            ))),
        }
    }
}

/// Indicator LED colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    Off,
    White,
    Blue,
    Red,
}

impl IndicatorColor {
    /// (red, green, blue) channel levels
    pub fn channels(&self) -> (bool, bool, bool) {
        match self {
            IndicatorColor::Off => (false, false, false),
            IndicatorColor::White => (true, true, true),
            IndicatorColor::Blue => (false, false, true),
            IndicatorColor::Red => (true, false, false),
        }
    }
}

/// Outcome of feeding one reading to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterlockObservation {
    pub reading: InterlockReading,
    pub state: InterlockState,
    pub previous: Option<InterlockState>,
    pub changed: bool,
    pub indicator: IndicatorColor,
    pub escalate: bool,
}

/// Sensor status as published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStatusPayload {
    pub dock_sensor: bool,
    pub carriage_sensor: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<InterlockState>,
    pub timestamp: f64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SensorStatusPayload {
    pub fn ok(reading: InterlockReading) -> Self {
        Self {
            dock_sensor: reading.dock_present,
            carriage_sensor: reading.carriage_present,
            state: Some(reading.classify()),
            timestamp: unix_timestamp(),
            status: "ok".to_string(),
            message: None,
        }
    }

    pub fn with_status(mut self, status: &str, message: Option<String>) -> Self {
        self.status = status.to_string();
        self.message = message;
        self
    }

    pub fn reading(&self) -> InterlockReading {
        InterlockReading::new(self.dock_sensor, self.carriage_sensor)
    }
}
