//! FaultEscalation - halt and alert on unsafe toolchanger states
//!
//! ## Responsibilities
//!
//! - Render the escalation script (error state, error code, error tools, pause)
//! - Send it over a [`FirmwareChannel`] without blocking the caller
//! - Keep going past individual command failures
//! - Send at most one script at a time; requests arriving meanwhile coalesce
//!   into the script already on the wire
//!
//! Fire-and-forget: nothing waits for the firmware to acknowledge.

mod channel;

pub use channel::{BusCommandChannel, FirmwareChannel, KlippySerialChannel};

use crate::interlock::InterlockState;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Error code the tool-change macros show for camera interlock faults
pub const CAMERA_ERROR_CODE: i32 = 7;

/// Pause-and-alert macro closing the script
pub const PAUSE_COMMAND: &str = "PAUSE_AND_ALERT";

/// Delay between consecutive script lines
pub const COMMAND_SPACING: Duration = Duration::from_millis(100);

/// Escalation script, in send order
pub fn escalation_script() -> Vec<String> {
    vec![
        "SET_GCODE_VARIABLE MACRO=VARIABLES_LIST VARIABLE=tc_state VALUE=-1".to_string(),
        format!(
            "SET_GCODE_VARIABLE MACRO=VARIABLES_LIST VARIABLE=tc_error_code VALUE={}",
            CAMERA_ERROR_CODE
        ),
        "SET_GCODE_VARIABLE MACRO=VARIABLES_LIST VARIABLE=error_tools VALUE=\"['camera']\""
            .to_string(),
        PAUSE_COMMAND.to_string(),
    ]
}

/// Clears the in-flight flag when the script task ends, even on panic
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fault escalator
pub struct FaultEscalator {
    channel: Arc<dyn FirmwareChannel>,
    spacing: Duration,
    escalations: AtomicU64,
    coalesced: AtomicU64,
    in_flight: Arc<AtomicBool>,
}

impl FaultEscalator {
    pub fn new(channel: Arc<dyn FirmwareChannel>) -> Self {
        Self {
            channel,
            spacing: COMMAND_SPACING,
            escalations: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the inter-command delay
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    /// Number of escalations started since creation
    pub fn escalation_count(&self) -> u64 {
        self.escalations.load(Ordering::Relaxed)
    }

    /// Requests folded into a script that was already being sent
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Start the escalation script on a blocking worker.
    ///
    /// Returns at once. The handle resolves to the number of lines the channel
    /// accepted; dropping it does not cancel the script. `None` when a script
    /// is still being sent: that script already ends in a pause.
    pub fn escalate(
        &self,
        state: Option<InterlockState>,
        reason: &str,
    ) -> Option<JoinHandle<usize>> {
        let state_name = state.map(|s| s.as_str()).unwrap_or("UNKNOWN");
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                state = state_name,
                reason = %reason,
                "Escalation already in progress, request coalesced"
            );
            return None;
        }
        let guard = InFlight(self.in_flight.clone());

        self.escalations.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            state = state_name,
            reason = %reason,
            channel = self.channel.name(),
            "Pausing print"
        );

        let channel = self.channel.clone();
        let spacing = self.spacing;
        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut sent = 0;
            for (index, line) in escalation_script().iter().enumerate() {
                if index > 0 {
                    std::thread::sleep(spacing);
                }
                match channel.send_command(line) {
                    Ok(()) => sent += 1,
                    Err(e) => {
                        tracing::error!(command = %line, error = %e, "Escalation command failed");
                    }
                }
            }
            sent
        }))
    }
}
