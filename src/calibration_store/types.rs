//! Calibration types

use crate::models::round_to;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default scale when nothing has been measured yet (µm per pixel)
pub const DEFAULT_MICRONS_PER_PIXEL: f64 = 10.0;

/// Pixel to machine correspondence marked by an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub pixel_x: u32,
    pub pixel_y: u32,
    pub machine_x: f64,
    pub machine_y: f64,
    pub machine_z: f64,
    pub created_at: DateTime<Utc>,
}

impl ReferencePoint {
    pub fn new(pixel_x: u32, pixel_y: u32, machine_x: f64, machine_y: f64, machine_z: f64) -> Self {
        Self {
            pixel_x,
            pixel_y,
            machine_x,
            machine_y,
            machine_z,
            created_at: Utc::now(),
        }
    }
}

/// Persisted calibration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub microns_per_pixel_x: f64,
    pub microns_per_pixel_y: f64,
    #[serde(default)]
    pub reference_points: Vec<ReferencePoint>,
    #[serde(default)]
    pub enabled: bool,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            microns_per_pixel_x: DEFAULT_MICRONS_PER_PIXEL,
            microns_per_pixel_y: DEFAULT_MICRONS_PER_PIXEL,
            reference_points: Vec::new(),
            enabled: false,
        }
    }
}

impl CalibrationState {
    /// Anchor used for conversion: the most recently added point
    pub fn anchor(&self) -> Option<&ReferencePoint> {
        self.reference_points.last()
    }

    /// Conversion is possible only when enabled with at least one point
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.reference_points.is_empty()
    }

    /// Image pixel to machine coordinate, anchored on the last reference point.
    ///
    /// Image rows grow downward while machine Y grows away from the operator,
    /// so the Y delta is subtracted.
    ///
    /// Non-finite pixel input converts to nothing.
    pub fn pixel_to_machine(&self, pixel_x: f64, pixel_y: f64) -> Option<PixelConversion> {
        if !self.is_usable() || !pixel_x.is_finite() || !pixel_y.is_finite() {
            return None;
        }
        let anchor = self.anchor()?;

        let pixel_dx = pixel_x - f64::from(anchor.pixel_x);
        let pixel_dy = pixel_y - f64::from(anchor.pixel_y);
        let machine_dx = pixel_dx * self.microns_per_pixel_x / 1000.0;
        let machine_dy = -pixel_dy * self.microns_per_pixel_y / 1000.0;

        Some(PixelConversion {
            machine_x: round_to(anchor.machine_x + machine_dx, 3),
            machine_y: round_to(anchor.machine_y + machine_dy, 3),
            anchor: anchor.clone(),
            pixel_delta: (pixel_dx, pixel_dy),
            machine_delta: (round_to(machine_dx, 3), round_to(machine_dy, 3)),
        })
    }

    /// Machine coordinate back to image pixel against the same anchor
    pub fn machine_to_pixel(&self, machine_x: f64, machine_y: f64) -> Option<(f64, f64)> {
        if !self.is_usable() || !machine_x.is_finite() || !machine_y.is_finite() {
            return None;
        }
        let anchor = self.anchor()?;

        let pixel_x = f64::from(anchor.pixel_x)
            + (machine_x - anchor.machine_x) * 1000.0 / self.microns_per_pixel_x;
        let pixel_y = f64::from(anchor.pixel_y)
            - (machine_y - anchor.machine_y) * 1000.0 / self.microns_per_pixel_y;
        Some((round_to(pixel_x, 3), round_to(pixel_y, 3)))
    }
}

/// Result of a pixel to machine conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelConversion {
    pub machine_x: f64,
    pub machine_y: f64,
    pub anchor: ReferencePoint,
    /// Pixel offset from the anchor
    pub pixel_delta: (f64, f64),
    /// Machine offset from the anchor (mm)
    pub machine_delta: (f64, f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrated() -> CalibrationState {
        CalibrationState {
            reference_points: vec![ReferencePoint::new(100, 100, 50.0, 50.0, 10.0)],
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_unusable_without_points_or_enable() {
        let empty = CalibrationState {
            enabled: true,
            ..Default::default()
        };
        assert!(empty.pixel_to_machine(10.0, 10.0).is_none());

        let mut disabled = calibrated();
        disabled.enabled = false;
        assert!(disabled.pixel_to_machine(10.0, 10.0).is_none());
        assert!(disabled.machine_to_pixel(50.0, 50.0).is_none());
    }

    #[test]
    fn test_non_finite_input_not_converted() {
        let state = calibrated();
        assert!(state.pixel_to_machine(f64::NAN, 90.0).is_none());
        assert!(state.pixel_to_machine(110.0, f64::INFINITY).is_none());
        assert!(state.machine_to_pixel(f64::NEG_INFINITY, 50.0).is_none());
        assert!(state.machine_to_pixel(50.0, f64::NAN).is_none());
        assert!(state.pixel_to_machine(110.0, 90.0).is_some());
    }

    #[test]
    fn test_y_axis_inverted() {
        let state = calibrated();
        let up = state.pixel_to_machine(100.0, 90.0).unwrap();
        let down = state.pixel_to_machine(100.0, 110.0).unwrap();
        assert!(up.machine_y > down.machine_y);
        assert_eq!(up.machine_y, 50.1);
        assert_eq!(down.machine_y, 49.9);
    }

    #[test]
    fn test_anchors_on_last_point() {
        let mut state = calibrated();
        state
            .reference_points
            .push(ReferencePoint::new(200, 200, 0.0, 0.0, 0.0));

        let conversion = state.pixel_to_machine(200.0, 200.0).unwrap();
        assert_eq!((conversion.machine_x, conversion.machine_y), (0.0, 0.0));
        assert_eq!(conversion.anchor.pixel_x, 200);
    }

    #[test]
    fn test_inverse_reproduces_pixels() {
        let mut state = calibrated();
        state.microns_per_pixel_x = 12.5;
        state.microns_per_pixel_y = 8.0;

        for (px, py) in [(0.0, 0.0), (100.0, 100.0), (640.0, 37.0), (1279.0, 959.0)] {
            let m = state.pixel_to_machine(px, py).unwrap();
            let (bx, by) = state.machine_to_pixel(m.machine_x, m.machine_y).unwrap();
            // 3-decimal rounding of mm is at most 0.0005 mm, i.e. < 0.1 px here
            assert!((bx - px).abs() < 0.1, "x {} -> {}", px, bx);
            assert!((by - py).abs() < 0.1, "y {} -> {}", py, by);
        }
    }

    #[test]
    fn test_legacy_document_defaults() {
        let state: CalibrationState =
            serde_json::from_str(r#"{"microns_per_pixel_x": 5.0, "microns_per_pixel_y": 5.0}"#)
                .unwrap();
        assert!(state.reference_points.is_empty());
        assert!(!state.enabled);
    }
}
