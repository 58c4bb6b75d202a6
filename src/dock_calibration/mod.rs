//! DockCalibration - automatic tool dock location on a CoreXY machine
//!
//! The tool is parked in its dock, then two configured moves push it out of
//! the unlock and lock positions while the XY steppers are sampled. The
//! microstep deltas give the dock positions relative to where the moves end.
//!
//! Results are stored with `SAVE_VARIABLE` under the tool's slot
//! (`<slot>_unlock_x`, `<slot>_unlock_y`, `<slot>_dock_z`, `<slot>_dock_x`,
//! `<slot>_dock_y`).

use crate::error::{Error, Result};
use crate::models::{round_to, Point2};
use serde::{Deserialize, Serialize};

/// Dwell between a move and the stepper sample
pub const SETTLE_GCODE: &str = "G4 P2000";

/// XY stepper positions in microsteps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepperPosition {
    pub x: i64,
    pub y: i64,
}

/// The two firmware primitives calibration needs
pub trait MotionController: Send + Sync {
    /// Current `stepper_x` / `stepper_y` MCU positions
    fn stepper_position(&self) -> Result<StepperPosition>;

    /// Run a G-code script and wait for it to be queued
    fn run_gcode(&self, script: &str) -> Result<()>;
}

/// Calibration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockCalibrationConfig {
    /// mm per microstep
    pub xy_resolution: f64,
    pub unlock_extra: Point2,
    pub lock_extra: Point2,
    pub dock_z: f64,
    /// Move out of the unlock position
    pub move_1_gcode: String,
    /// Move out of the lock position
    pub move_2_gcode: String,
}

impl Default for DockCalibrationConfig {
    fn default() -> Self {
        Self {
            xy_resolution: 0.003125,
            unlock_extra: Point2::new(0.5, 0.2),
            lock_extra: Point2::new(0.5, 0.8),
            dock_z: 35.0,
            move_1_gcode: String::new(),
            move_2_gcode: String::new(),
        }
    }
}

/// Calibrated dock location of one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockPositions {
    pub slot: String,
    pub unlock: Point2,
    /// Lock position, stored as the dock position
    pub lock: Point2,
    pub dock_z: f64,
}

impl DockPositions {
    /// `SAVE_VARIABLE` lines persisting this result
    pub fn save_variable_gcode(&self) -> Vec<String> {
        [
            ("unlock_x", self.unlock.x),
            ("unlock_y", self.unlock.y),
            ("dock_z", self.dock_z),
            ("dock_x", self.lock.x),
            ("dock_y", self.lock.y),
        ]
        .iter()
        .map(|(name, value)| {
            format!("SAVE_VARIABLE VARIABLE={}_{} VALUE={}", self.slot, name, value)
        })
        .collect()
    }
}

/// Normalise a tool slot: one letter followed by digits (`e0`, `C1` -> `c1`)
pub fn parse_slot(raw: &str) -> Result<String> {
    let slot = raw.trim().to_ascii_lowercase();
    let mut chars = slot.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && !chars.as_str().is_empty()
        && chars.all(|c| c.is_ascii_digit());
    if !valid {
        return Err(Error::Validation(format!(
            "invalid tool id '{}', expected a letter followed by digits (e0, c1, l2)",
            raw.trim()
        )));
    }
    Ok(slot)
}

/// CoreXY: a pure X move turns both motors the same way, a pure Y move opposite ways
fn corexy_offset(from: StepperPosition, to: StepperPosition, resolution: f64, extra: Point2) -> Point2 {
    let dx = (to.x - from.x) as f64;
    let dy = (to.y - from.y) as f64;
    Point2::new(
        round_to(-((dx + dy) / 2.0) * resolution + extra.x, 2),
        round_to(-((dx - dy) / 2.0) * resolution + extra.y, 2),
    )
}

/// Dock calibrator
#[derive(Debug, Clone, Default)]
pub struct DockCalibrator {
    config: DockCalibrationConfig,
}

impl DockCalibrator {
    pub fn new(config: DockCalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DockCalibrationConfig {
        &self.config
    }

    /// Dock positions from the three stepper samples
    pub fn compute(
        &self,
        slot: &str,
        initial: StepperPosition,
        after_move_1: StepperPosition,
        after_move_2: StepperPosition,
    ) -> DockPositions {
        let res = self.config.xy_resolution;
        DockPositions {
            slot: slot.to_string(),
            unlock: corexy_offset(after_move_1, after_move_2, res, self.config.unlock_extra),
            lock: corexy_offset(initial, after_move_2, res, self.config.lock_extra),
            dock_z: self.config.dock_z,
        }
    }

    /// Run the calibration sequence for `slot` and save the result
    pub fn calibrate(&self, ctl: &dyn MotionController, slot: &str) -> Result<DockPositions> {
        let slot = parse_slot(slot)?;

        let initial = ctl.stepper_position()?;
        tracing::info!(slot = %slot, x = initial.x, y = initial.y, "Dock calibration initial position");

        let after_move_1 = self.move_and_sample(ctl, &self.config.move_1_gcode)?;
        tracing::info!(slot = %slot, x = after_move_1.x, y = after_move_1.y, "Dock calibration move 1 position");

        let after_move_2 = self.move_and_sample(ctl, &self.config.move_2_gcode)?;
        tracing::info!(slot = %slot, x = after_move_2.x, y = after_move_2.y, "Dock calibration move 2 position");

        let positions = self.compute(&slot, initial, after_move_1, after_move_2);
        for line in positions.save_variable_gcode() {
            ctl.run_gcode(&line).map_err(|e| {
                Error::Firmware(format!(
                    "saving dock position failed ({}); is save_variables configured? {}",
                    line, e
                ))
            })?;
        }

        tracing::info!(
            slot = %slot,
            unlock_x = positions.unlock.x,
            unlock_y = positions.unlock.y,
            dock_z = positions.dock_z,
            "Dock calibration complete"
        );
        Ok(positions)
    }

    fn move_and_sample(&self, ctl: &dyn MotionController, template: &str) -> Result<StepperPosition> {
        if !template.trim().is_empty() {
            ctl.run_gcode(template)?;
        }
        ctl.run_gcode(SETTLE_GCODE)?;
        ctl.stepper_position()
    }
}
