//! GPIO access: sensor readers and indicator LEDs
//!
//! Lines are requested once through the gpiod character-device API and held
//! for the life of the reader/indicator, so output levels persist between
//! writes. Calls block; the poller runs them on the blocking pool.

use crate::error::{Error, Result};
use crate::interlock::{IndicatorColor, InterlockReading};
use crate::pubsub::{topics, PubSubTransport};
use gpiod::{Chip, Input, Lines, Options, Output};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Chip used when detection finds nothing better
pub const DEFAULT_GPIO_CHIP: &str = "gpiochip0";

/// Label of the Raspberry Pi 5 header pin controller
const RP1_LABEL: &str = "pinctrl-rp1";

/// Source of dock/carriage readings
pub trait SensorReader: Send + Sync {
    fn read(&self) -> Result<InterlockReading>;
}

/// One colour channel of the RGB indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedChannel {
    Red,
    Green,
    Blue,
}

impl LedChannel {
    pub const ALL: [LedChannel; 3] = [LedChannel::Red, LedChannel::Green, LedChannel::Blue];

    /// Bus topic driving this channel
    pub fn topic(&self) -> &'static str {
        match self {
            LedChannel::Red => topics::LED_RED,
            LedChannel::Green => topics::LED_GREEN,
            LedChannel::Blue => topics::LED_BLUE,
        }
    }

    fn index(&self) -> usize {
        match self {
            LedChannel::Red => 0,
            LedChannel::Green => 1,
            LedChannel::Blue => 2,
        }
    }
}

/// RGB indicator
pub trait Indicator: Send + Sync {
    fn set_channel(&self, channel: LedChannel, on: bool) -> Result<()>;

    fn set_color(&self, color: IndicatorColor) -> Result<()> {
        let (red, green, blue) = color.channels();
        self.set_channel(LedChannel::Red, red)?;
        self.set_channel(LedChannel::Green, green)?;
        self.set_channel(LedChannel::Blue, blue)
    }
}

/// Pick the GPIO chip: the `pinctrl-rp1` controller (Raspberry Pi 5) if present
pub fn detect_chip() -> String {
    let entries = match std::fs::read_dir("/dev") {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot list GPIO chips, using default chip");
            return DEFAULT_GPIO_CHIP.to_string();
        }
    };

    let mut chips = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("gpiochip") {
            continue;
        }
        match Chip::new(entry.path()) {
            Ok(chip) => chips.push((name, chip.label().to_string())),
            Err(e) => tracing::debug!(chip = %name, error = %e, "GPIO chip not readable"),
        }
    }
    chip_by_label(&chips)
}

/// Choose among `(name, label)` pairs
pub fn chip_by_label(chips: &[(String, String)]) -> String {
    chips
        .iter()
        .find(|(_, label)| label == RP1_LABEL)
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| DEFAULT_GPIO_CHIP.to_string())
}

fn open_chip(chip: Option<String>) -> Result<(String, Chip)> {
    let name = chip.unwrap_or_else(detect_chip);
    let path = if name.starts_with('/') {
        PathBuf::from(&name)
    } else {
        PathBuf::from("/dev").join(&name)
    };
    let chip = Chip::new(&path)
        .map_err(|e| Error::Gpio(format!("failed to open GPIO chip '{}': {}", name, e)))?;
    Ok((name, chip))
}

/// Sensor reader holding the dock and carriage lines as inputs
pub struct GpiodReader {
    lines: Mutex<Lines<Input>>,
}

impl GpiodReader {
    /// `chip` of `None` runs detection once here
    pub fn open(chip: Option<String>, dock_pin: u32, carriage_pin: u32) -> Result<Self> {
        let (name, chip) = open_chip(chip)?;
        let options = Options::input([dock_pin, carriage_pin]).consumer("dakash-sensors");
        let lines = chip.request_lines(options).map_err(|e| {
            Error::Gpio(format!(
                "failed to request sensor lines {}/{} on {}: {}",
                dock_pin, carriage_pin, name, e
            ))
        })?;
        tracing::info!(chip = %name, dock_pin, carriage_pin, "GPIO sensor lines requested");
        Ok(Self {
            lines: Mutex::new(lines),
        })
    }
}

impl SensorReader for GpiodReader {
    fn read(&self) -> Result<InterlockReading> {
        let [dock, carriage] = self
            .lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_values([false; 2])
            .map_err(|e| Error::Gpio(format!("sensor line read failed: {}", e)))?;
        Ok(reading_from_raw(u8::from(dock), u8::from(carriage)))
    }
}

/// Dock line idles high, carriage line idles low
pub fn reading_from_raw(dock_raw: u8, carriage_raw: u8) -> InterlockReading {
    InterlockReading::new(dock_raw != 0, carriage_raw != 1)
}

/// Settable reading for benches without GPIO hardware
#[derive(Debug)]
pub struct SimulatedSensor {
    reading: Mutex<std::result::Result<InterlockReading, String>>,
}

impl SimulatedSensor {
    pub fn new(reading: InterlockReading) -> Self {
        Self {
            reading: Mutex::new(Ok(reading)),
        }
    }

    pub fn set(&self, reading: InterlockReading) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = Ok(reading);
    }

    /// Make subsequent reads fail
    pub fn fail(&self, message: impl Into<String>) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) = Err(message.into());
    }
}

impl SensorReader for SimulatedSensor {
    fn read(&self) -> Result<InterlockReading> {
        self.reading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map_err(Error::Gpio)
    }
}

struct LedOutputs {
    lines: Lines<Output>,
    levels: [bool; 3],
}

/// Indicator holding the red, green and blue lines as outputs
pub struct GpiodIndicator {
    outputs: Mutex<LedOutputs>,
}

impl GpiodIndicator {
    /// Request the three lines, all off
    pub fn open(chip: Option<String>, red_pin: u32, green_pin: u32, blue_pin: u32) -> Result<Self> {
        let (name, chip) = open_chip(chip)?;
        let options = Options::output([red_pin, green_pin, blue_pin])
            .values([false; 3])
            .consumer("dakash-led");
        let lines = chip.request_lines(options).map_err(|e| {
            Error::Gpio(format!("failed to request LED lines on {}: {}", name, e))
        })?;
        tracing::info!(chip = %name, red_pin, green_pin, blue_pin, "GPIO LED lines requested");
        Ok(Self {
            outputs: Mutex::new(LedOutputs {
                lines,
                levels: [false; 3],
            }),
        })
    }
}

impl Indicator for GpiodIndicator {
    fn set_channel(&self, channel: LedChannel, on: bool) -> Result<()> {
        let mut outputs = self.outputs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut levels = outputs.levels;
        levels[channel.index()] = on;
        outputs
            .lines
            .set_values(levels)
            .map_err(|e| Error::Gpio(format!("LED {:?} write failed: {}", channel, e)))?;
        outputs.levels = levels;
        Ok(())
    }
}

/// Indicator for a process without GPIO access: publishes channel levels
pub struct BusIndicator {
    transport: Arc<dyn PubSubTransport>,
}

impl BusIndicator {
    pub fn new(transport: Arc<dyn PubSubTransport>) -> Self {
        Self { transport }
    }
}

impl Indicator for BusIndicator {
    fn set_channel(&self, channel: LedChannel, on: bool) -> Result<()> {
        let level = if on { "1.0" } else { "0.0" };
        self.transport
            .publish(channel.topic(), level.as_bytes().to_vec())
    }
}

/// Parse an LED level payload (`0.0`..`1.0`); above half is on
pub fn parse_led_level(payload: &str) -> Result<bool> {
    let level: f64 = payload
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("invalid LED level '{}'", payload.trim())))?;
    Ok(level.clamp(0.0, 1.0) > 0.5)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Indicator recording every channel write
    #[derive(Default)]
    pub struct RecordingIndicator {
        pub writes: Mutex<Vec<(LedChannel, bool)>>,
    }

    impl RecordingIndicator {
        pub fn writes(&self) -> Vec<(LedChannel, bool)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl Indicator for RecordingIndicator {
        fn set_channel(&self, channel: LedChannel, on: bool) -> Result<()> {
            self.writes.lock().unwrap().push((channel, on));
            Ok(())
        }
    }
}
