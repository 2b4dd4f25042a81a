//! Deployment configuration
//!
//! Everything that differs between appliances and front-end boards lives
//! here: sample timing, the calibration profile, the activity threshold and
//! the cooldown that separates two wash cycles. All fields have defaults
//! matching the reference washing-machine deployment, and `#[serde(default)]`
//! lets a partial document override only what it names.

use core::fmt::Write;

use embassy_time::Duration;
use serde::Deserialize;
use thiserror_no_std::Error;

use crate::cycle::DetectorParams;
use crate::sensors::FrontEndMode;

pub const DEVICE_ID_CAPACITY: usize = 32;
pub const TOPIC_CAPACITY: usize = 64;
pub const PROFILE_NAME_CAPACITY: usize = 24;

pub type DeviceId = heapless::String<DEVICE_ID_CAPACITY>;
pub type Topic = heapless::String<TOPIC_CAPACITY>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{field} must be a finite positive number")]
    NotPositive { field: &'static str },
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} does not fit in {capacity} bytes")]
    TooLong {
        field: &'static str,
        capacity: usize,
    },
}

/// Build a bounded string, failing instead of truncating.
pub(crate) fn bounded<const N: usize>(
    value: &str,
    field: &'static str,
) -> Result<heapless::String<N>, ConfigError> {
    let mut out = heapless::String::new();
    out.write_str(value)
        .map_err(|_| ConfigError::TooLong { field, capacity: N })?;
    Ok(out)
}

/// Linear calibration of the current-sense circuit.
///
/// `amps = rms_volts * slope - intercept`. The profile is a named value
/// handed to the accumulator at construction so one firmware image serves
/// every board revision.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalibrationProfile {
    pub name: heapless::String<PROFILE_NAME_CAPACITY>,
    pub slope: f32,
    pub intercept: f32,
    /// DC bias in ADC counts used until the first reference measurement
    pub initial_offset_counts: i32,
}

impl CalibrationProfile {
    /// Profile of the reference ACS712 board on the 6.144 V range.
    pub fn acs712_reference() -> Self {
        Self {
            name: bounded("acs712-reference", "calibration.name").unwrap_or_default(),
            slope: 11.02,
            intercept: 0.70,
            initial_offset_counts: 13200,
        }
    }

    pub fn apply(&self, rms_volts: f32) -> f32 {
        rms_volts * self.slope - self.intercept
    }
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self::acs712_reference()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Topic receiving one current reading per measurement window
    pub readings_topic: Topic,
    /// Topic receiving cycle start/end transitions
    pub state_topic: Topic,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            readings_topic: bounded("acs712", "telemetry.readings_topic").unwrap_or_default(),
            state_topic: bounded("acs712/state", "telemetry.state_topic").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub device_id: DeviceId,
    pub sample_interval_us: u64,
    pub window_ms: u64,
    pub recalibration_interval_ms: u64,
    /// Reference-channel reads averaged per offset recalibration
    pub reference_samples: u16,
    pub threshold_amps: f32,
    /// Continuous sub-threshold time that ends a cycle
    pub end_of_cycle_ms: u64,
    pub calibration: CalibrationProfile,
    pub front_end: FrontEndMode,
    pub telemetry: TelemetryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_id: bounded("wasmachine 1", "device_id").unwrap_or_default(),
            sample_interval_us: 1160,
            window_ms: 1000,
            recalibration_interval_ms: 60_000,
            reference_samples: 64,
            threshold_amps: 0.5,
            end_of_cycle_ms: 6000,
            calibration: CalibrationProfile::default(),
            front_end: FrontEndMode::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_micros(self.sample_interval_us)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn recalibration_interval(&self) -> Duration {
        Duration::from_millis(self.recalibration_interval_ms)
    }

    pub fn end_of_cycle(&self) -> Duration {
        Duration::from_millis(self.end_of_cycle_ms)
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            threshold_amps: self.threshold_amps,
            end_of_cycle: self.end_of_cycle(),
        }
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::Empty { field: "device_id" });
        }
        if self.telemetry.readings_topic.is_empty() {
            return Err(ConfigError::Empty {
                field: "telemetry.readings_topic",
            });
        }
        if self.telemetry.state_topic.is_empty() {
            return Err(ConfigError::Empty {
                field: "telemetry.state_topic",
            });
        }

        let durations = [
            ("sample_interval_us", self.sample_interval_us),
            ("window_ms", self.window_ms),
            ("recalibration_interval_ms", self.recalibration_interval_ms),
            ("end_of_cycle_ms", self.end_of_cycle_ms),
        ];
        for (field, value) in durations {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.reference_samples == 0 {
            return Err(ConfigError::Zero {
                field: "reference_samples",
            });
        }

        let positives = [
            ("threshold_amps", self.threshold_amps),
            ("calibration.slope", self.calibration.slope),
        ];
        for (field, value) in positives {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NotPositive { field });
            }
        }
        if !self.calibration.intercept.is_finite() {
            return Err(ConfigError::NotFinite {
                field: "calibration.intercept",
            });
        }

        Ok(())
    }
}
