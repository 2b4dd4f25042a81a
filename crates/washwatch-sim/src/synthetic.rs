//! Synthetic current-transformer signal.

use std::f64::consts::PI;

use embassy_time::Instant;
use log::debug;

use washwatch_core::metrics::ADC_FULL_SCALE_COUNTS;
use washwatch_core::{AnalogFrontEnd, CalibrationProfile, FrontEndMode, MonitorConfig, RawReading};

/// Mains frequency of the simulated load.
const MAINS_HZ: f64 = 50.0;

/// Peak deviation of the slowly drifting `vdd/2` bias, in counts.
const BIAS_DRIFT_COUNTS: f64 = 40.0;

const BIAS_DRIFT_PERIOD_SECS: f64 = 600.0;

/// Peak-to-peak of the uniform noise added to every conversion, in counts.
const NOISE_COUNTS: u32 = 16;

/// One stretch of the program with a constant RMS load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub seconds: u32,
    pub amps: f32,
}

const fn seg(seconds: u32, amps: f32) -> Segment {
    Segment { seconds, amps }
}

/// A full wash: fill, heat, tumble with short pauses, drain, spin.
///
/// The pauses are shorter than the default end-of-cycle delay, so the whole
/// program is reported as a single session.
pub fn wash_program() -> Vec<Segment> {
    let mut program = vec![seg(30, 0.0), seg(60, 0.2), seg(120, 8.5)];
    for _ in 0..10 {
        program.push(seg(12, 1.8));
        program.push(seg(4, 0.15));
    }
    program.extend([seg(20, 0.6), seg(60, 3.2)]);
    program
}

/// Front end producing a 50 Hz sine whose RMS follows a [`Segment`] program.
///
/// The simulator moves its clock forward with [`Self::set_time`] before every
/// tick; after the program ends the line stays quiet.
pub struct SyntheticFrontEnd {
    program: Vec<Segment>,
    calibration: CalibrationProfile,
    bias: f64,
    volts_per_count: f64,
    now_secs: f64,
    rng: u32,
}

impl SyntheticFrontEnd {
    pub fn new(config: &MonitorConfig, program: Vec<Segment>) -> Self {
        Self {
            program,
            calibration: config.calibration.clone(),
            bias: config.calibration.initial_offset_counts as f64,
            volts_per_count: config.front_end.gain.full_scale_volts() as f64
                / ADC_FULL_SCALE_COUNTS as f64,
            now_secs: 0.0,
            rng: 0x2545_f491,
        }
    }

    pub fn set_time(&mut self, now: Instant) {
        self.now_secs = now.as_micros() as f64 / 1_000_000.0;
    }

    /// Total length of the scripted part of the program.
    pub fn program_seconds(&self) -> u32 {
        self.program.iter().map(|s| s.seconds).sum()
    }

    fn amps_now(&self) -> f32 {
        let mut start = 0.0;
        for segment in &self.program {
            let end = start + segment.seconds as f64;
            if self.now_secs < end {
                return segment.amps;
            }
            start = end;
        }
        0.0
    }

    /// Sine amplitude in counts that reads back as `amps` through the calibration.
    fn peak_counts(&self, amps: f32) -> f64 {
        if amps <= 0.0 {
            return 0.0;
        }
        let rms_volts =
            (amps + self.calibration.intercept) as f64 / self.calibration.slope as f64;
        rms_volts / self.volts_per_count * 2f64.sqrt()
    }

    fn bias_now(&self) -> f64 {
        self.bias + BIAS_DRIFT_COUNTS * (2.0 * PI * self.now_secs / BIAS_DRIFT_PERIOD_SECS).sin()
    }

    fn noise(&mut self) -> f64 {
        // Numerical Recipes LCG
        self.rng = self.rng.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        ((self.rng >> 16) % NOISE_COUNTS) as f64 - (NOISE_COUNTS / 2) as f64
    }

    fn to_code(value: f64) -> RawReading {
        let full_scale = ADC_FULL_SCALE_COUNTS as f64;
        RawReading(value.round().clamp(-full_scale, full_scale - 1.0) as i32)
    }
}

impl AnalogFrontEnd for SyntheticFrontEnd {
    fn sample(&mut self) -> RawReading {
        let phase = 2.0 * PI * MAINS_HZ * self.now_secs;
        let signal = self.peak_counts(self.amps_now()) * phase.sin();
        let value = self.bias_now() + signal + self.noise();
        Self::to_code(value)
    }

    fn sample_reference(&mut self) -> RawReading {
        let value = self.bias_now() + self.noise();
        Self::to_code(value)
    }

    fn set_mode(&mut self, mode: FrontEndMode) {
        self.volts_per_count = mode.gain.full_scale_volts() as f64 / ADC_FULL_SCALE_COUNTS as f64;
        debug!(
            "Synthetic front end: ±{} V, {} SPS, continuous={}",
            mode.gain.full_scale_volts(),
            mode.data_rate.samples_per_second(),
            mode.continuous
        );
    }
}
