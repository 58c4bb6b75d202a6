//! CalibrationStore - pixel to machine mapping state
//!
//! ## Responsibilities
//!
//! - Scale factors (µm per pixel) and the ordered reference point list
//! - Pixel to machine conversion anchored on the newest reference point
//! - Persist-then-publish on every mutation, serialised by one mutex
//!
//! Storage failures never lose the in-memory change; the caller sees
//! `Saved { persisted: false }` and the state is valid until restart.

mod types;

pub use types::*;

use crate::blob_store::{BlobStore, Saved};
use crate::error::{Error, Result};
use crate::models::Point3;
use crate::pubsub::{topics, PubSubTransport};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Blob key of the calibration document
pub const CALIBRATION_BLOB: &str = "calibration";

/// Calibration store
pub struct CalibrationStore {
    state: Mutex<CalibrationState>,
    blobs: BlobStore,
    transport: Arc<dyn PubSubTransport>,
}

impl CalibrationStore {
    /// Load persisted calibration, falling back to defaults
    pub async fn load(blobs: BlobStore, transport: Arc<dyn PubSubTransport>) -> Self {
        let state = match blobs.load::<CalibrationState>(CALIBRATION_BLOB).await {
            Ok(Some(mut state)) => {
                if !valid_scale(state.microns_per_pixel_x) || !valid_scale(state.microns_per_pixel_y) {
                    tracing::warn!(
                        x = state.microns_per_pixel_x,
                        y = state.microns_per_pixel_y,
                        "Stored calibration scale invalid, using default scale"
                    );
                    state.microns_per_pixel_x = DEFAULT_MICRONS_PER_PIXEL;
                    state.microns_per_pixel_y = DEFAULT_MICRONS_PER_PIXEL;
                }
                tracing::info!(
                    points = state.reference_points.len(),
                    enabled = state.enabled,
                    "Calibration loaded"
                );
                state
            }
            Ok(None) => {
                tracing::info!(path = %blobs.path_for(CALIBRATION_BLOB).display(), "No stored calibration, using defaults");
                CalibrationState::default()
            }
            Err(e) => {
                tracing::error!(error = %e, "Stored calibration unreadable, using defaults");
                CalibrationState::default()
            }
        };

        Self {
            state: Mutex::new(state),
            blobs,
            transport,
        }
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> CalibrationState {
        self.state.lock().await.clone()
    }

    /// Append a reference point
    pub async fn add_reference_point(
        &self,
        pixel_x: u32,
        pixel_y: u32,
        machine: Point3,
    ) -> Result<Saved<ReferencePoint>> {
        if !machine.is_finite() {
            return Err(Error::Validation(
                "machine coordinates must be finite numbers".to_string(),
            ));
        }

        let point = ReferencePoint::new(pixel_x, pixel_y, machine.x, machine.y, machine.z);
        let mut state = self.state.lock().await;
        state.reference_points.push(point.clone());
        tracing::info!(
            pixel_x,
            pixel_y,
            machine_x = machine.x,
            machine_y = machine.y,
            machine_z = machine.z,
            total = state.reference_points.len(),
            "Reference point added"
        );
        let persisted = self.persist_and_publish(&state).await;
        Ok(Saved::new(point, persisted))
    }

    /// Set the per-axis scale (µm per pixel)
    pub async fn set_scale(&self, microns_per_pixel_x: f64, microns_per_pixel_y: f64) -> Result<Saved<()>> {
        if !valid_scale(microns_per_pixel_x) || !valid_scale(microns_per_pixel_y) {
            return Err(Error::Validation(format!(
                "scale must be finite and > 0 (got x={}, y={})",
                microns_per_pixel_x, microns_per_pixel_y
            )));
        }

        let mut state = self.state.lock().await;
        state.microns_per_pixel_x = microns_per_pixel_x;
        state.microns_per_pixel_y = microns_per_pixel_y;
        tracing::info!(x = microns_per_pixel_x, y = microns_per_pixel_y, "Calibration scale set");
        let persisted = self.persist_and_publish(&state).await;
        Ok(Saved::new((), persisted))
    }

    /// Derive the scale from a feature of known length and apply it to both axes
    pub async fn set_scale_from_measured_line(
        &self,
        measured_mm: f64,
        pixel_length: f64,
    ) -> Result<Saved<f64>> {
        if pixel_length == 0.0 || !pixel_length.is_finite() {
            return Err(Error::Validation(
                "pixel length must be a non-zero number".to_string(),
            ));
        }
        let microns_per_pixel = measured_mm * 1000.0 / pixel_length;
        if !valid_scale(microns_per_pixel) {
            return Err(Error::Validation(format!(
                "derived scale {} µm/px is not positive",
                microns_per_pixel
            )));
        }

        tracing::info!(measured_mm, pixel_length, microns_per_pixel, "Scale derived from measured line");
        let saved = self.set_scale(microns_per_pixel, microns_per_pixel).await?;
        Ok(saved.map(|_| microns_per_pixel))
    }

    /// Enable conversion (idempotent)
    pub async fn enable(&self) -> Saved<bool> {
        self.set_enabled(true).await
    }

    /// Disable conversion (idempotent)
    pub async fn disable(&self) -> Saved<bool> {
        self.set_enabled(false).await
    }

    async fn set_enabled(&self, enabled: bool) -> Saved<bool> {
        let mut state = self.state.lock().await;
        state.enabled = enabled;
        if enabled && state.reference_points.is_empty() {
            tracing::warn!("Calibration enabled without reference points, conversions stay unavailable");
        } else {
            tracing::info!(enabled, "Calibration toggled");
        }
        let persisted = self.persist_and_publish(&state).await;
        Saved::new(enabled, persisted)
    }

    /// Drop every reference point and disable conversion
    pub async fn clear(&self) -> Saved<()> {
        let mut state = self.state.lock().await;
        let removed = state.reference_points.len();
        state.reference_points.clear();
        state.enabled = false;
        tracing::info!(removed, "Calibration cleared");
        let persisted = self.persist_and_publish(&state).await;
        Saved::new((), persisted)
    }

    /// Image pixel to machine coordinate, `None` when calibration is not
    /// available or the pixel is not a finite number
    pub async fn pixel_to_machine(&self, pixel_x: f64, pixel_y: f64) -> Option<PixelConversion> {
        if !pixel_x.is_finite() || !pixel_y.is_finite() {
            tracing::warn!(pixel_x, pixel_y, "Non-numeric pixel rejected");
            return None;
        }
        let state = self.state.lock().await;
        let conversion = state.pixel_to_machine(pixel_x, pixel_y);
        if conversion.is_none() {
            tracing::debug!(
                enabled = state.enabled,
                points = state.reference_points.len(),
                "Calibration not available"
            );
        }
        conversion
    }

    /// Machine coordinate to image pixel against the same anchor
    pub async fn machine_to_pixel(&self, machine_x: f64, machine_y: f64) -> Option<(f64, f64)> {
        self.state.lock().await.machine_to_pixel(machine_x, machine_y)
    }

    /// Write the blob then announce the new state. Returns whether the write succeeded.
    async fn persist_and_publish(&self, state: &CalibrationState) -> bool {
        let persisted = match self.blobs.save(CALIBRATION_BLOB, state).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    code = e.kind_code(),
                    "Calibration not persisted, change kept in memory only"
                );
                false
            }
        };

        match serde_json::to_value(state) {
            Ok(value) => {
                if let Err(e) = self.transport.publish_json(topics::CALIBRATION, &value) {
                    tracing::warn!(error = %e, "Calibration update not published");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Calibration state not serialisable"),
        }

        persisted
    }
}

fn valid_scale(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
