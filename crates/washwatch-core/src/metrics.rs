//! RMS current computation
//!
//! Offset-corrected samples are squared and summed over a measurement window
//! (one second by default, i.e. ~860 samples or ~50 mains periods). At the
//! end of the window the RMS value is converted from ADC counts to volts
//! using the front end's full-scale range and then to amps with the
//! calibration profile.

use embassy_time::{Duration, Instant};
use log::{debug, warn};

use crate::config::CalibrationProfile;
use crate::sensors::RawReading;

/// Positive full-scale code of the 16-bit signed converter
pub const ADC_FULL_SCALE_COUNTS: f32 = 32768.0;

/// Running sums of one measurement window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub sum_of_squares: f64,
    pub sample_count: u32,
    pub started_at: Instant,
}

impl Window {
    pub const fn new(started_at: Instant) -> Self {
        Self {
            sum_of_squares: 0.0,
            sample_count: 0,
            started_at,
        }
    }

    /// RMS in ADC counts, `None` for an empty window.
    pub fn rms_counts(&self) -> Option<f64> {
        if self.sample_count == 0 {
            return None;
        }
        Some(libm::sqrt(self.sum_of_squares / self.sample_count as f64))
    }
}

/// Calibrated RMS current of one finished window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsReading {
    /// Always `>= 0`
    pub amps: f32,
    pub computed_at: Instant,
}

impl RmsReading {
    /// Reading in whole milliamps, as published.
    pub fn milliamps(&self) -> u32 {
        libm::roundf(self.amps * 1000.0) as u32
    }
}

pub struct RmsAccumulator {
    window: Window,
    window_length: Duration,
    volts_per_count: f32,
    calibration: CalibrationProfile,
    missed_windows: u32,
}

impl RmsAccumulator {
    pub fn new(
        window_length: Duration,
        full_scale_volts: f32,
        calibration: CalibrationProfile,
        now: Instant,
    ) -> Self {
        Self {
            window: Window::new(now),
            window_length,
            volts_per_count: full_scale_volts / ADC_FULL_SCALE_COUNTS,
            calibration,
            missed_windows: 0,
        }
    }

    /// Fold one offset-corrected sample into the current window.
    pub fn accumulate(&mut self, sample: RawReading) {
        let value = sample.code() as f64;
        self.window.sum_of_squares += value * value;
        self.window.sample_count = self.window.sample_count.saturating_add(1);
    }

    /// Close the window once it has run its full length.
    ///
    /// An empty window (the loop starved the sampler) produces no reading; it
    /// is counted in [`Self::missed_windows`] and a new window starts.
    pub fn finalize_if_due(&mut self, now: Instant) -> Option<RmsReading> {
        if now.saturating_duration_since(self.window.started_at) < self.window_length {
            return None;
        }

        let finished = core::mem::replace(&mut self.window, Window::new(now));

        let Some(rms_counts) = finished.rms_counts() else {
            self.missed_windows = self.missed_windows.saturating_add(1);
            warn!(
                "Measurement window starting at {} ms had no samples ({} missed so far)",
                finished.started_at.as_millis(),
                self.missed_windows
            );
            return None;
        };

        let amps = self.amps_from_rms_counts(rms_counts);
        debug!(
            "Window closed: {} samples, rms {:.1} counts, {:.3} A",
            finished.sample_count, rms_counts, amps
        );

        Some(RmsReading {
            amps,
            computed_at: now,
        })
    }

    /// Convert an RMS value in counts to calibrated, non-negative amps.
    pub fn amps_from_rms_counts(&self, rms_counts: f64) -> f32 {
        let rms_volts = rms_counts as f32 * self.volts_per_count;
        let amps = self.calibration.apply(rms_volts);
        // NaN also lands on zero here.
        if amps > 0.0 { amps } else { 0.0 }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn missed_windows(&self) -> u32 {
        self.missed_windows
    }
}
