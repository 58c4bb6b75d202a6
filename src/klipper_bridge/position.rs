//! Position responder

use crate::correlation_client::{MoonrakerClient, PositionRequest, PositionResponse};
use crate::error::Result;
use crate::models::unix_timestamp;
use crate::pubsub::{topics, BusMessage, PubSubTransport};
use std::sync::Arc;
use tokio::runtime::Handle;
use uuid::Uuid;

/// Error text sent when the firmware cannot report a position
pub const POSITION_FAILURE: &str = "Failed to get position";

/// Answers `{"request": "current_position"}` on the position request topic
pub struct PositionResponder {
    transport: Arc<dyn PubSubTransport>,
    moonraker: MoonrakerClient,
}

impl PositionResponder {
    pub fn new(transport: Arc<dyn PubSubTransport>, moonraker: MoonrakerClient) -> Self {
        Self {
            transport,
            moonraker,
        }
    }

    /// Subscribe to position requests. Must be called inside the runtime.
    pub fn attach(self: &Arc<Self>) {
        let runtime = Handle::current();
        let responder = self.clone();
        self.transport.subscribe(
            topics::POSITION_REQUEST,
            Arc::new(move |message: &BusMessage| responder.on_request(&runtime, message)),
        );
        tracing::info!(moonraker = %self.moonraker.base_url(), "Position responder attached");
    }

    fn on_request(self: &Arc<Self>, runtime: &Handle, message: &BusMessage) {
        let request: PositionRequest = match message.json() {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, payload = %message.payload_str(), "Invalid JSON in position request");
                return;
            }
        };
        if !request.is_current_position() {
            tracing::debug!(request = %request.request, "Position request ignored");
            return;
        }

        let responder = self.clone();
        runtime.spawn(async move {
            if let Err(e) = responder.respond(request.request_id).await {
                tracing::error!(error = %e, "Position response not published");
            }
        });
    }

    /// Query the firmware and publish the answer
    pub async fn respond(&self, request_id: Option<Uuid>) -> Result<PositionResponse> {
        let response = match self.moonraker.query_position().await {
            Ok(sample) => {
                PositionResponse::success(sample.x, sample.y, sample.z, unix_timestamp(), request_id)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error getting printer position");
                PositionResponse::failure(POSITION_FAILURE, unix_timestamp(), request_id)
            }
        };

        self.transport
            .publish(topics::POSITION_RESPONSE, serde_json::to_vec(&response)?)?;
        tracing::info!(
            request_id = ?request_id,
            status = response.status.as_deref().unwrap_or("unknown"),
            "Position sent"
        );
        Ok(response)
    }
}
