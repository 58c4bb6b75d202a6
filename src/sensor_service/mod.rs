//! SensorRequestService - on-demand sensor queries over the bus
//!
//! ## Responsibilities
//!
//! - Answer bare-string commands on the sensor request topic
//!   (`status`, `verify_docked`, `verify_picked`, `check`)
//! - Escalate when a verification fails or the sensors cannot be read
//! - Drive indicator channels from the LED topics when an indicator is attached

use crate::error::{Error, Result};
use crate::fault_escalation::FaultEscalator;
use crate::interlock::{InterlockState, SensorStatusPayload};
use crate::models::{unix_timestamp, ErrorPayload};
use crate::pubsub::{topics, BusMessage, PubSubTransport};
use crate::sensor_poller::{parse_led_level, Indicator, LedChannel, SensorReader};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Reason used when the sensors cannot be read during a request
pub const SENSOR_READ_FAILURE: &str = "Failed to read camera sensors";

/// Sensor request command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    Status,
    VerifyDocked,
    VerifyPicked,
    Check,
}

impl FromStr for SensorCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "status" => Ok(SensorCommand::Status),
            "verify_docked" => Ok(SensorCommand::VerifyDocked),
            "verify_picked" => Ok(SensorCommand::VerifyPicked),
            "check" => Ok(SensorCommand::Check),
            other => Err(Error::Parse(format!("unknown sensor request '{}'", other))),
        }
    }
}

/// Verification or check outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<InterlockState>,
    pub timestamp: f64,
    pub status: String,
}

/// Reply published on the sensor status topic
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SensorResponse {
    Status(SensorStatusPayload),
    Verification(VerificationPayload),
    Error(ErrorPayload),
}

/// Sensor request service
pub struct SensorRequestService {
    reader: Arc<dyn SensorReader>,
    escalator: Arc<FaultEscalator>,
    transport: Arc<dyn PubSubTransport>,
    indicator: Option<Arc<dyn Indicator>>,
}

impl SensorRequestService {
    pub fn new(
        reader: Arc<dyn SensorReader>,
        escalator: Arc<FaultEscalator>,
        transport: Arc<dyn PubSubTransport>,
    ) -> Self {
        Self {
            reader,
            escalator,
            transport,
            indicator: None,
        }
    }

    /// Also obey the LED topics with this indicator
    pub fn with_indicator(mut self, indicator: Arc<dyn Indicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    /// Subscribe to the request topic (and LED topics if an indicator is attached).
    ///
    /// Must be called inside the runtime; handlers may then be invoked from
    /// any transport thread.
    pub fn attach(self: &Arc<Self>) {
        let runtime = Handle::current();

        let service = self.clone();
        let request_runtime = runtime.clone();
        self.transport.subscribe(
            topics::SENSOR_REQUEST,
            Arc::new(move |message: &BusMessage| service.on_request(&request_runtime, message)),
        );

        if self.indicator.is_some() {
            for channel in LedChannel::ALL {
                let service = self.clone();
                let led_runtime = runtime.clone();
                self.transport.subscribe(
                    channel.topic(),
                    Arc::new(move |message: &BusMessage| {
                        service.on_led(&led_runtime, channel, message)
                    }),
                );
            }
        }
        tracing::info!(leds = self.indicator.is_some(), "Sensor request service attached");
    }

    fn on_request(self: &Arc<Self>, runtime: &Handle, message: &BusMessage) {
        let content = message.payload_str();
        let command = match content.parse::<SensorCommand>() {
            Ok(command) => command,
            Err(_) => {
                tracing::warn!(request = %content, "Unknown sensor request");
                return;
            }
        };
        tracing::info!(command = ?command, "Sensor request received");

        let service = self.clone();
        runtime.spawn(async move {
            let response = service.respond(command).await;
            if let Err(e) = service.publish(&response) {
                tracing::warn!(error = %e, "Sensor response not published");
            }
        });
    }

    fn on_led(&self, runtime: &Handle, channel: LedChannel, message: &BusMessage) {
        let Some(indicator) = self.indicator.clone() else {
            return;
        };
        let on = match parse_led_level(&message.payload_str()) {
            Ok(on) => on,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Invalid LED level ignored");
                return;
            }
        };
        runtime.spawn_blocking(move || {
            if let Err(e) = indicator.set_channel(channel, on) {
                tracing::warn!(channel = ?channel, error = %e, "LED update failed");
            }
        });
    }

    /// Serve one command
    pub async fn respond(&self, command: SensorCommand) -> SensorResponse {
        match command {
            SensorCommand::Status => match self.read_state().await {
                Ok(payload) => SensorResponse::Status(payload),
                Err(e) => {
                    tracing::error!(error = %e, "Sensor status unavailable");
                    let mut payload = ErrorPayload::from_error(&e);
                    payload.error = "Failed to read sensors".to_string();
                    SensorResponse::Error(payload)
                }
            },
            SensorCommand::VerifyDocked => {
                let (result, state) = self.verify(InterlockState::Docked).await;
                SensorResponse::Verification(outcome(Some("docked"), None, result, state))
            }
            SensorCommand::VerifyPicked => {
                let (result, state) = self.verify(InterlockState::OnCarriage).await;
                SensorResponse::Verification(outcome(Some("picked"), None, result, state))
            }
            SensorCommand::Check => {
                let (result, state) = self.check().await;
                SensorResponse::Verification(outcome(None, Some("state"), result, state))
            }
        }
    }

    /// Confirm the camera is in `expected`; escalate otherwise
    pub async fn verify(&self, expected: InterlockState) -> (bool, Option<InterlockState>) {
        let state = match self.read_state().await {
            Ok(payload) => payload.reading().classify(),
            Err(e) => {
                tracing::error!(error = %e, "Sensor read failed during verification");
                drop(self.escalator.escalate(None, SENSOR_READ_FAILURE));
                return (false, None);
            }
        };

        if state == expected {
            tracing::info!(state = %state, "Camera tool state verified");
            return (true, Some(state));
        }

        let reason = format!("Camera not in expected state. Expected: {}, actual: {}", expected, state);
        drop(self.escalator.escalate(Some(state), &reason));
        (false, Some(state))
    }

    /// Escalate on fault states
    pub async fn check(&self) -> (bool, Option<InterlockState>) {
        let state = match self.read_state().await {
            Ok(payload) => payload.reading().classify(),
            Err(e) => {
                tracing::error!(error = %e, "Sensor read failed during check");
                drop(self.escalator.escalate(None, SENSOR_READ_FAILURE));
                return (false, None);
            }
        };

        match state.fault_reason() {
            Some(reason) => {
                drop(self.escalator.escalate(Some(state), reason));
                (false, Some(state))
            }
            None => {
                tracing::info!(state = %state, "Camera tool status normal");
                (true, Some(state))
            }
        }
    }

    async fn read_state(&self) -> Result<SensorStatusPayload> {
        let reader = self.reader.clone();
        let reading = tokio::task::spawn_blocking(move || reader.read())
            .await
            .map_err(|e| Error::Internal(format!("sensor read task failed: {}", e)))??;
        Ok(SensorStatusPayload::ok(reading))
    }

    fn publish(&self, response: &SensorResponse) -> Result<()> {
        let bytes = serde_json::to_vec(response)?;
        self.transport.publish(topics::SENSOR_STATUS, bytes)
    }
}

fn outcome(
    verification: Option<&str>,
    check: Option<&str>,
    result: bool,
    state: Option<InterlockState>,
) -> VerificationPayload {
    VerificationPayload {
        verification: verification.map(str::to_string),
        check: check.map(str::to_string),
        result,
        state,
        timestamp: unix_timestamp(),
        status: if result { "success" } else { "failed" }.to_string(),
    }
}
