//! Interlock - dock/carriage safety state machine
//!
//! Classifies every fresh sensor reading, decides the indicator colour and
//! whether the fault escalation must fire.
//!
//! ## Semantics
//!
//! - The state is a pure function of the latest reading
//! - Memory beyond that is limited to the previous state (edge detection) and
//!   the blink phase of the fault indicator
//! - Fault indication toggles red/off every 500 ms of the caller's monotonic
//!   clock, so blink fidelity follows the polling period

mod types;

pub use types::*;

use std::time::{Duration, Instant};

/// Fault indicator half period
pub const BLINK_INTERVAL: Duration = Duration::from_millis(500);

/// Interlock state machine, owned by the single polling worker
#[derive(Debug)]
pub struct InterlockMachine {
    mode: EscalationMode,
    last_state: Option<InterlockState>,
    blink_on: bool,
    last_toggle: Option<Instant>,
}

impl InterlockMachine {
    pub fn new(mode: EscalationMode) -> Self {
        Self {
            mode,
            last_state: None,
            blink_on: false,
            last_toggle: None,
        }
    }

    pub fn mode(&self) -> EscalationMode {
        self.mode
    }

    /// Feed one reading sampled at `now`
    pub fn observe(&mut self, reading: InterlockReading, now: Instant) -> InterlockObservation {
        let state = reading.classify();
        let previous = self.last_state.replace(state);
        let changed = previous != Some(state);

        if changed {
            match previous {
                Some(prev) if state.is_fault() => {
                    tracing::error!(from = %prev, to = %state, "Interlock entered fault state");
                }
                Some(prev) => {
                    tracing::info!(from = %prev, to = %state, "Interlock state changed");
                }
                None if state.is_fault() => {
                    tracing::error!(state = %state, "Interlock starts in fault state");
                }
                None => {
                    tracing::info!(state = %state, "Interlock initial state");
                }
            }
        }

        let indicator = self.indicator_for(state, changed, now);

        let escalate = state.is_fault()
            && match self.mode {
                EscalationMode::Edge => changed,
                EscalationMode::Level => true,
            };

        InterlockObservation {
            reading,
            state,
            previous,
            changed,
            indicator,
            escalate,
        }
    }

    fn indicator_for(&mut self, state: InterlockState, changed: bool, now: Instant) -> IndicatorColor {
        match state {
            InterlockState::Docked => {
                self.last_toggle = None;
                IndicatorColor::White
            }
            InterlockState::OnCarriage => {
                self.last_toggle = None;
                IndicatorColor::Blue
            }
            InterlockState::Detached | InterlockState::Conflicting => {
                match self.last_toggle {
                    Some(at) if !changed => {
                        if now.saturating_duration_since(at) >= BLINK_INTERVAL {
                            self.blink_on = !self.blink_on;
                            self.last_toggle = Some(now);
                        }
                    }
                    _ => {
                        // Fault indication starts lit
                        self.blink_on = true;
                        self.last_toggle = Some(now);
                    }
                }
                if self.blink_on {
                    IndicatorColor::Red
                } else {
                    IndicatorColor::Off
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKED: InterlockReading = InterlockReading {
        dock_present: true,
        carriage_present: false,
    };
    const PICKED: InterlockReading = InterlockReading {
        dock_present: false,
        carriage_present: true,
    };
    const CONFLICT: InterlockReading = InterlockReading {
        dock_present: false,
        carriage_present: false,
    };
    const DETACHED: InterlockReading = InterlockReading {
        dock_present: true,
        carriage_present: true,
    };

    #[test]
    fn test_edge_escalates_once_per_entry() {
        let mut machine = InterlockMachine::new(EscalationMode::Edge);
        let t0 = Instant::now();

        assert!(!machine.observe(DOCKED, t0).escalate);
        let first = machine.observe(CONFLICT, t0);
        assert!(first.escalate);
        assert!(first.changed);
        for i in 1..10 {
            let obs = machine.observe(CONFLICT, t0 + Duration::from_millis(100 * i));
            assert!(!obs.escalate, "poll {} re-escalated", i);
        }
        // Fault to a different fault is a new entry
        assert!(machine.observe(DETACHED, t0 + Duration::from_secs(2)).escalate);
        // Leave and re-enter
        assert!(!machine.observe(PICKED, t0 + Duration::from_secs(3)).escalate);
        assert!(machine.observe(CONFLICT, t0 + Duration::from_secs(4)).escalate);
    }

    #[test]
    fn test_edge_escalates_on_first_observation() {
        let mut machine = InterlockMachine::new(EscalationMode::Edge);
        let obs = machine.observe(DETACHED, Instant::now());
        assert_eq!(obs.previous, None);
        assert!(obs.escalate);
    }

    #[test]
    fn test_level_escalates_every_poll() {
        let mut machine = InterlockMachine::new(EscalationMode::Level);
        let t0 = Instant::now();
        for i in 0..5 {
            assert!(machine.observe(CONFLICT, t0 + Duration::from_millis(100 * i)).escalate);
        }
        assert!(!machine.observe(DOCKED, t0 + Duration::from_secs(1)).escalate);
    }

    #[test]
    fn test_steady_indicators() {
        let mut machine = InterlockMachine::new(EscalationMode::Edge);
        let t0 = Instant::now();
        assert_eq!(machine.observe(DOCKED, t0).indicator, IndicatorColor::White);
        assert_eq!(machine.observe(PICKED, t0).indicator, IndicatorColor::Blue);
    }

    #[test]
    fn test_fault_blinks_at_half_second() {
        let mut machine = InterlockMachine::new(EscalationMode::Edge);
        let t0 = Instant::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);

        assert_eq!(machine.observe(CONFLICT, at(0)).indicator, IndicatorColor::Red);
        assert_eq!(machine.observe(CONFLICT, at(400)).indicator, IndicatorColor::Red);
        assert_eq!(machine.observe(CONFLICT, at(500)).indicator, IndicatorColor::Off);
        assert_eq!(machine.observe(CONFLICT, at(900)).indicator, IndicatorColor::Off);
        assert_eq!(machine.observe(CONFLICT, at(1000)).indicator, IndicatorColor::Red);
    }

    #[test]
    fn test_state_is_pure_of_reading() {
        let mut edge = InterlockMachine::new(EscalationMode::Edge);
        let mut level = InterlockMachine::new(EscalationMode::Level);
        let t0 = Instant::now();
        for reading in [DOCKED, CONFLICT, PICKED, DETACHED, DOCKED] {
            assert_eq!(edge.observe(reading, t0).state, reading.classify());
            assert_eq!(level.observe(reading, t0).state, reading.classify());
        }
    }
}
