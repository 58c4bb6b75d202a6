//! CorrelationClient - request/response over pub/sub
//!
//! ## Responsibilities
//!
//! - Turn a fire-and-forget publish into a bounded-wait position query
//! - Pair each request with its response through a per-request correlation id
//! - Keep the last known machine position as a lock-guarded cache
//! - Prefer the firmware's HTTP status endpoint when one is configured
//!
//! ## Semantics
//!
//! - A request never waits longer than its timeout; on timeout the cached
//!   sample is returned tagged `StaleCached`
//! - A transport failure is reported immediately as `TransportError`
//! - Malformed responses are logged and leave the cache untouched
//! - A response that arrives after its caller gave up is still absorbed into
//!   the cache for the next caller

mod moonraker;
mod types;

pub use moonraker::{parse_toolhead_position, MoonrakerClient};
#[cfg(test)]
pub(crate) use moonraker::testing;
pub use types::*;

use crate::pubsub::{topics, BusMessage, PubSubTransport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Default wait for a position response
pub const DEFAULT_POSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Cached sample and pending waiters, guarded by one mutex
struct CorrelationState {
    cached: PositionSample,
    pending: HashMap<Uuid, oneshot::Sender<ResponseOutcome>>,
}

fn lock_state(shared: &Mutex<CorrelationState>) -> MutexGuard<'_, CorrelationState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Position query client
pub struct PositionClient {
    transport: Arc<dyn PubSubTransport>,
    request_topic: String,
    http: Option<MoonrakerClient>,
    shared: Arc<Mutex<CorrelationState>>,
    default_timeout: Duration,
}

impl PositionClient {
    /// Create a client on the standard position topics
    pub fn new(transport: Arc<dyn PubSubTransport>, default_timeout: Duration) -> Self {
        Self::with_topics(
            transport,
            topics::POSITION_REQUEST,
            topics::POSITION_RESPONSE,
            default_timeout,
        )
    }

    /// Create a client on custom topics and subscribe to the response topic
    pub fn with_topics(
        transport: Arc<dyn PubSubTransport>,
        request_topic: &str,
        response_topic: &str,
        default_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(Mutex::new(CorrelationState {
            cached: PositionSample::origin(),
            pending: HashMap::new(),
        }));

        let handler_state = shared.clone();
        transport.subscribe(
            response_topic,
            Arc::new(move |message: &BusMessage| handle_response(&handler_state, message)),
        );

        Self {
            transport,
            request_topic: request_topic.to_string(),
            http: None,
            shared,
            default_timeout,
        }
    }

    /// Use the firmware HTTP endpoint as the preferred path
    pub fn with_http(mut self, http: MoonrakerClient) -> Self {
        tracing::info!(base_url = %http.base_url(), "Position client will prefer HTTP status endpoint");
        self.http = Some(http);
        self
    }

    /// Copy of the last known position
    pub fn cached_position(&self) -> PositionSample {
        lock_state(&self.shared).cached
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        lock_state(&self.shared).pending.len()
    }

    /// Request the position with the configured default timeout
    pub async fn current_position(&self) -> PositionReading {
        self.request_position(self.default_timeout).await
    }

    /// Request the current machine position, waiting at most `timeout`
    pub async fn request_position(&self, timeout: Duration) -> PositionReading {
        let deadline = Instant::now() + timeout;

        if let Some(http) = &self.http {
            match tokio::time::timeout(timeout, http.query_position()).await {
                Ok(Ok(sample)) => {
                    lock_state(&self.shared).cached = sample;
                    tracing::debug!(x = sample.x, y = sample.y, z = sample.z, "Position read over HTTP");
                    return PositionReading {
                        sample,
                        status: PositionStatus::Fresh,
                    };
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "HTTP position query failed, falling back to pub/sub");
                }
                Err(_) => {
                    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "HTTP position query timed out");
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        self.request_over_bus(remaining).await
    }

    async fn request_over_bus(&self, timeout: Duration) -> PositionReading {
        let request_id = Uuid::new_v4();
        let payload = match serde_json::to_vec(&PositionRequest::current_position(request_id)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode position request");
                return self.cached_reading(PositionStatus::TransportError);
            }
        };

        let (tx, rx) = oneshot::channel();
        lock_state(&self.shared).pending.insert(request_id, tx);

        if let Err(e) = self.transport.publish(&self.request_topic, payload) {
            let cached = {
                let mut state = lock_state(&self.shared);
                state.pending.remove(&request_id);
                state.cached
            };
            tracing::warn!(
                request_id = %request_id,
                error = %e,
                "Position request could not be published"
            );
            return PositionReading {
                sample: cached,
                status: PositionStatus::TransportError,
            };
        }

        tracing::debug!(request_id = %request_id, "Position requested");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ResponseOutcome::Success(sample))) => PositionReading {
                sample,
                status: PositionStatus::Fresh,
            },
            Ok(Ok(ResponseOutcome::Failed(reason))) => {
                tracing::warn!(
                    request_id = %request_id,
                    reason = %reason,
                    "Firmware could not report position, using cached sample"
                );
                self.cached_reading(PositionStatus::StaleCached)
            }
            Ok(Err(_)) => self.cached_reading(PositionStatus::StaleCached),
            Err(_) => {
                let cached = {
                    let mut state = lock_state(&self.shared);
                    state.pending.remove(&request_id);
                    state.cached
                };
                tracing::warn!(
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Position request timed out, returning cached sample"
                );
                PositionReading {
                    sample: cached,
                    status: PositionStatus::StaleCached,
                }
            }
        }
    }

    fn cached_reading(&self, status: PositionStatus) -> PositionReading {
        let sample = self.cached_position();
        tracing::debug!(
            status = status.as_str(),
            age_ms = sample.age().num_milliseconds(),
            placeholder = sample.is_placeholder(),
            "Returning cached position"
        );
        PositionReading { sample, status }
    }
}

/// Response handler, runs on the transport delivery thread
fn handle_response(shared: &Mutex<CorrelationState>, message: &BusMessage) {
    let response: PositionResponse = match message.json() {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                topic = %message.topic,
                error = %e,
                payload = %message.payload_str(),
                "Malformed position response ignored"
            );
            return;
        }
    };

    let outcome = match response.outcome() {
        Some(outcome) => outcome,
        None => {
            tracing::warn!(
                payload = %message.payload_str(),
                "Position response claims success without numeric x/y/z, ignored"
            );
            return;
        }
    };

    let mut state = lock_state(shared);
    if let ResponseOutcome::Success(sample) = &outcome {
        state.cached = *sample;
    }

    match response.request_id {
        Some(request_id) => match state.pending.remove(&request_id) {
            Some(waiter) => {
                let _ = waiter.send(outcome.clone());
            }
            None => {
                tracing::debug!(
                    request_id = %request_id,
                    "Response for a request nobody is waiting on, absorbed into cache"
                );
            }
        },
        None => {
            // Legacy responders do not echo ids; every waiter asked the same question
            for (_, waiter) in state.pending.drain() {
                let _ = waiter.send(outcome.clone());
            }
        }
    }
    drop(state);

    match outcome {
        ResponseOutcome::Success(sample) => {
            tracing::info!(x = sample.x, y = sample.y, z = sample.z, "Printer position updated");
        }
        ResponseOutcome::Failed(reason) => {
            tracing::warn!(reason = %reason, "Firmware reported position failure, cache retained");
        }
    }
}
