//! SensorPoller - periodic interlock sampling
//!
//! ## Responsibilities
//!
//! - Sample the dock/carriage sensors at a fixed period
//! - Feed the interlock state machine and drive the indicator
//! - Start fault escalation without waiting for it
//! - Publish sensor status on change and periodically
//!
//! ## Design
//!
//! The polling task is the only writer of sensor state. Stopping clears the
//! running flag and joins with a bound; a worker that does not exit in time is
//! abandoned, not killed.

pub(crate) mod gpio;

pub use gpio::*;

use crate::error::{Error, Result};
use crate::fault_escalation::FaultEscalator;
use crate::interlock::{
    EscalationMode, IndicatorColor, InterlockMachine, InterlockObservation, InterlockReading,
    SensorStatusPayload,
};
use crate::pubsub::{topics, PubSubTransport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Poller timing
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Republish an unchanged reading after this long
    pub republish_every: Duration,
    pub join_timeout: Duration,
    pub escalation_mode: EscalationMode,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            republish_every: Duration::from_secs(30),
            join_timeout: Duration::from_secs(2),
            escalation_mode: EscalationMode::Edge,
        }
    }
}

#[derive(Debug, Default)]
struct OutputState {
    last_published: Option<InterlockReading>,
    last_publish_at: Option<Instant>,
    last_indicator: Option<IndicatorColor>,
}

/// Sensor polling loop
pub struct SensorPoller {
    reader: Arc<dyn SensorReader>,
    indicator: Arc<dyn Indicator>,
    escalator: Arc<FaultEscalator>,
    transport: Arc<dyn PubSubTransport>,
    config: PollerConfig,
    machine: Mutex<InterlockMachine>,
    outputs: Mutex<OutputState>,
    latest: RwLock<Option<InterlockObservation>>,
    running: Arc<RwLock<bool>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SensorPoller {
    pub fn new(
        reader: Arc<dyn SensorReader>,
        indicator: Arc<dyn Indicator>,
        escalator: Arc<FaultEscalator>,
        transport: Arc<dyn PubSubTransport>,
        config: PollerConfig,
    ) -> Self {
        Self {
            reader,
            indicator,
            escalator,
            transport,
            machine: Mutex::new(InterlockMachine::new(config.escalation_mode)),
            config,
            outputs: Mutex::new(OutputState::default()),
            latest: RwLock::new(None),
            running: Arc::new(RwLock::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Most recent observation
    pub async fn latest(&self) -> Option<InterlockObservation> {
        *self.latest.read().await
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Start the polling task
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Sensor polling already running");
                return;
            }
            *running = true;
        }

        let mode = self.machine.lock().await.mode();
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            mode = ?mode,
            "Starting sensor polling"
        );

        let poller = self.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            loop {
                if !*running.read().await {
                    break;
                }

                if let Err(e) = poller.poll_once().await {
                    tracing::warn!(error = %e, code = e.kind_code(), "Sensor poll failed");
                }

                tokio::time::sleep(poller.config.interval).await;
            }
            tracing::info!("Sensor polling stopped");
        });

        *self.worker.lock().await = Some(handle);
    }

    /// Stop the polling task, waiting at most the join timeout
    pub async fn stop(&self) {
        *self.running.write().await = false;
        tracing::info!("Stopping sensor polling");

        let Some(handle) = self.worker.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(self.config.join_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Sensor polling task failed"),
            Err(_) => tracing::warn!(
                timeout_ms = self.config.join_timeout.as_millis() as u64,
                "Sensor polling task did not stop in time, abandoned"
            ),
        }
    }

    /// One sampling iteration
    pub async fn poll_once(&self) -> Result<InterlockObservation> {
        let reader = self.reader.clone();
        let reading = tokio::task::spawn_blocking(move || reader.read())
            .await
            .map_err(|e| Error::Internal(format!("sensor read task failed: {}", e)))??;

        let observation = self.machine.lock().await.observe(reading, Instant::now());

        if observation.escalate {
            let reason = observation
                .state
                .fault_reason()
                .unwrap_or("Unsafe toolchanger state");
            // Fire-and-forget
            drop(self.escalator.escalate(Some(observation.state), reason));
        }

        self.drive_indicator(observation.indicator).await;
        self.publish_if_due(reading).await;

        *self.latest.write().await = Some(observation);
        Ok(observation)
    }

    async fn drive_indicator(&self, color: IndicatorColor) {
        let mut outputs = self.outputs.lock().await;
        if outputs.last_indicator == Some(color) {
            return;
        }

        let indicator = self.indicator.clone();
        match tokio::task::spawn_blocking(move || indicator.set_color(color)).await {
            Ok(Ok(())) => outputs.last_indicator = Some(color),
            Ok(Err(e)) => tracing::warn!(color = ?color, error = %e, "Indicator update failed"),
            Err(e) => tracing::warn!(error = %e, "Indicator task failed"),
        }
    }

    async fn publish_if_due(&self, reading: InterlockReading) {
        let mut outputs = self.outputs.lock().await;
        let now = Instant::now();
        let changed = outputs.last_published != Some(reading);
        let stale = outputs
            .last_publish_at
            .map_or(true, |at| now.duration_since(at) >= self.config.republish_every);
        if !changed && !stale {
            return;
        }

        let payload = SensorStatusPayload::ok(reading);
        let result = serde_json::to_vec(&payload)
            .map_err(Error::from)
            .and_then(|bytes| self.transport.publish(topics::SENSOR_STATUS, bytes));
        match result {
            Ok(()) => {
                outputs.last_published = Some(reading);
                outputs.last_publish_at = Some(now);
                tracing::debug!(
                    dock = reading.dock_present,
                    carriage = reading.carriage_present,
                    changed,
                    "Sensor status published"
                );
            }
            Err(e) => tracing::warn!(error = %e, "Sensor status not published"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::gpio::testing::RecordingIndicator;
    use super::*;
    use crate::fault_escalation::testing::RecordingChannel;
    use crate::interlock::InterlockState;
    use crate::pubsub::{BusMessage, LocalBus};

    struct Rig {
        sensor: Arc<SimulatedSensor>,
        indicator: Arc<RecordingIndicator>,
        channel: Arc<RecordingChannel>,
        escalator: Arc<FaultEscalator>,
        statuses: Arc<std::sync::Mutex<Vec<SensorStatusPayload>>>,
        poller: Arc<SensorPoller>,
    }

    fn rig(initial: InterlockReading, config: PollerConfig) -> Rig {
        let bus = LocalBus::start();
        let statuses = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = statuses.clone();
        bus.subscribe(
            topics::SENSOR_STATUS,
            Arc::new(move |msg: &BusMessage| sink.lock().unwrap().push(msg.json().unwrap())),
        );

        let sensor = Arc::new(SimulatedSensor::new(initial));
        let indicator = Arc::new(RecordingIndicator::default());
        let channel = Arc::new(RecordingChannel::default());
        let escalator =
            Arc::new(FaultEscalator::new(channel.clone()).with_spacing(Duration::ZERO));
        let poller = Arc::new(SensorPoller::new(
            sensor.clone(),
            indicator.clone(),
            escalator.clone(),
            bus,
            config,
        ));
        Rig {
            sensor,
            indicator,
            channel,
            escalator,
            statuses,
            poller,
        }
    }

    #[tokio::test]
    async fn test_docked_poll() {
        let rig = rig(InterlockReading::new(true, false), PollerConfig::default());
        let obs = rig.poller.poll_once().await.unwrap();
        assert_eq!(obs.state, InterlockState::Docked);
        assert!(!obs.escalate);
        assert_eq!(rig.indicator.writes().len(), 3);
        assert_eq!(rig.escalator.escalation_count(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let statuses = rig.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, Some(InterlockState::Docked));
    }

    #[tokio::test]
    async fn test_fault_escalates_once_in_edge_mode() {
        let rig = rig(InterlockReading::new(false, false), PollerConfig::default());
        for _ in 0..5 {
            rig.poller.poll_once().await.unwrap();
        }
        assert_eq!(rig.escalator.escalation_count(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rig.channel.pause_count(), 1);
    }

    #[tokio::test]
    async fn test_fault_escalates_every_poll_in_level_mode() {
        let config = PollerConfig {
            escalation_mode: EscalationMode::Level,
            ..Default::default()
        };
        let rig = rig(InterlockReading::new(true, true), config);
        for _ in 0..3 {
            rig.poller.poll_once().await.unwrap();
            // Let each script finish so the next poll starts a new one
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(rig.escalator.escalation_count(), 3);
        assert_eq!(rig.channel.pause_count(), 3);
    }

    #[tokio::test]
    async fn test_indicator_and_status_deduplicated() {
        let rig = rig(InterlockReading::new(false, true), PollerConfig::default());
        for _ in 0..4 {
            rig.poller.poll_once().await.unwrap();
        }
        // One colour change, three channel writes
        assert_eq!(rig.indicator.writes().len(), 3);

        rig.sensor.set(InterlockReading::new(true, false));
        rig.poller.poll_once().await.unwrap();
        assert_eq!(rig.indicator.writes().len(), 6);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rig.statuses.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_reading_republished_when_due() {
        let config = PollerConfig {
            republish_every: Duration::ZERO,
            ..Default::default()
        };
        let rig = rig(InterlockReading::new(true, false), config);
        for _ in 0..3 {
            rig.poller.poll_once().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rig.statuses.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_read_failure_does_not_escalate() {
        let rig = rig(InterlockReading::new(true, false), PollerConfig::default());
        rig.sensor.fail("line busy");
        assert!(matches!(rig.poller.poll_once().await, Err(Error::Gpio(_))));
        assert_eq!(rig.escalator.escalation_count(), 0);
        assert!(rig.poller.latest().await.is_none());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let config = PollerConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let rig = rig(InterlockReading::new(false, true), config);
        rig.poller.start().await;
        rig.poller.start().await;
        assert!(rig.poller.is_running().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        rig.poller.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!rig.poller.is_running().await);

        let latest = rig.poller.latest().await.unwrap();
        assert_eq!(latest.state, InterlockState::OnCarriage);
    }
}
