//! Correlation client types and wire payloads

use crate::models::round_to;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Last known machine position. Copied out of the cache, never borrowed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub captured_at: DateTime<Utc>,
}

impl PositionSample {
    /// Sample captured now
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            captured_at: Utc::now(),
        }
    }

    /// Placeholder before any position has been received
    pub fn origin() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            captured_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Whether this is still the startup placeholder
    pub fn is_placeholder(&self) -> bool {
        self.captured_at == DateTime::<Utc>::UNIX_EPOCH
    }

    /// Age relative to now
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.captured_at
    }
}

/// How a position read was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Answered by the firmware for this request
    Fresh,
    /// No answer in time (or the firmware reported failure); cached sample returned
    StaleCached,
    /// The request could not be sent; cached sample returned
    TransportError,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Fresh => "fresh",
            PositionStatus::StaleCached => "stale_cached",
            PositionStatus::TransportError => "transport_error",
        }
    }
}

/// Result of `request_position`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionReading {
    pub sample: PositionSample,
    pub status: PositionStatus,
}

impl PositionReading {
    pub fn is_fresh(&self) -> bool {
        self.status == PositionStatus::Fresh
    }
}

/// Request payload published on the position request topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRequest {
    pub request: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl PositionRequest {
    pub const CURRENT_POSITION: &'static str = "current_position";

    pub fn current_position(request_id: Uuid) -> Self {
        Self {
            request: Self::CURRENT_POSITION.to_string(),
            request_id: Some(request_id),
        }
    }

    pub fn is_current_position(&self) -> bool {
        self.request == Self::CURRENT_POSITION
    }
}

/// Response payload on the position response topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

/// Validated meaning of a response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Success(PositionSample),
    Failed(String),
}

impl PositionResponse {
    pub const STATUS_SUCCESS: &'static str = "success";
    pub const STATUS_ERROR: &'static str = "error";

    /// Successful response for `request_id`
    pub fn success(x: f64, y: f64, z: f64, timestamp: f64, request_id: Option<Uuid>) -> Self {
        Self {
            x: Some(round_to(x, 3)),
            y: Some(round_to(y, 3)),
            z: Some(round_to(z, 3)),
            status: Some(Self::STATUS_SUCCESS.to_string()),
            error: None,
            timestamp: Some(timestamp),
            request_id,
        }
    }

    /// Failure response for `request_id`
    pub fn failure(error: impl Into<String>, timestamp: f64, request_id: Option<Uuid>) -> Self {
        Self {
            status: Some(Self::STATUS_ERROR.to_string()),
            error: Some(error.into()),
            timestamp: Some(timestamp),
            request_id,
            ..Default::default()
        }
    }

    /// Classify the response.
    ///
    /// - `Some(Success)`: explicit success with finite x, y, z
    /// - `Some(Failed)`: status absent or anything other than success
    /// - `None`: success claimed without usable coordinates (malformed)
    pub fn outcome(&self) -> Option<ResponseOutcome> {
        match self.status.as_deref() {
            Some(status) if status == Self::STATUS_SUCCESS => match (self.x, self.y, self.z) {
                (Some(x), Some(y), Some(z)) if x.is_finite() && y.is_finite() && z.is_finite() => {
                    Some(ResponseOutcome::Success(PositionSample::new(x, y, z)))
                }
                _ => None,
            },
            Some(other) => Some(ResponseOutcome::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| format!("firmware reported status '{}'", other)),
            )),
            None => Some(ResponseOutcome::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| "response carried no status".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> PositionResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_success_outcome() {
        let response = parse(r#"{"x": 10.5, "y": 20.25, "z": 5.0, "status": "success"}"#);
        match response.outcome() {
            Some(ResponseOutcome::Success(sample)) => {
                assert_eq!((sample.x, sample.y, sample.z), (10.5, 20.25, 5.0));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_explicit_failure_outcome() {
        let response = parse(r#"{"error": "Failed to get position", "status": "error"}"#);
        assert_eq!(
            response.outcome(),
            Some(ResponseOutcome::Failed("Failed to get position".to_string()))
        );
    }

    #[test]
    fn test_missing_status_is_failure() {
        let response = parse(r#"{"x": 1.0, "y": 2.0, "z": 3.0}"#);
        assert!(matches!(response.outcome(), Some(ResponseOutcome::Failed(_))));
    }

    #[test]
    fn test_success_without_coordinates_is_malformed() {
        let response = parse(r#"{"x": 1.0, "status": "success"}"#);
        assert_eq!(response.outcome(), None);
    }

    #[test]
    fn test_request_round_trip_keeps_id() {
        let id = Uuid::new_v4();
        let json = serde_json::to_string(&PositionRequest::current_position(id)).unwrap();
        assert!(json.contains("\"request\":\"current_position\""));
        let back: PositionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, Some(id));
        assert!(back.is_current_position());
    }

    #[test]
    fn test_legacy_request_without_id() {
        let request: PositionRequest =
            serde_json::from_str(r#"{"request": "current_position"}"#).unwrap();
        assert!(request.request_id.is_none());
    }

    #[test]
    fn test_origin_placeholder() {
        assert!(PositionSample::origin().is_placeholder());
        assert!(!PositionSample::new(0.0, 0.0, 0.0).is_placeholder());
    }
}
