//! Fixed-cadence acquisition with DC-offset removal.

use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use log::{debug, info};

use crate::sensors::{AnalogFrontEnd, RawReading};

/// Pulls offset-corrected readings from the front end at a fixed cadence.
///
/// The current-sense output idles at `vdd/2`. That bias drifts slowly with
/// supply and temperature, so it is re-measured on the reference channel
/// every `recalibration_interval` and subtracted from every sample.
pub struct Sampler<A, D> {
    front_end: A,
    delay: D,
    sample_interval: Duration,
    recalibration_interval: Duration,
    reference_samples: u16,
    offset: i32,
    last_sample: Option<Instant>,
    last_calibration: Option<Instant>,
}

impl<A, D> Sampler<A, D>
where
    A: AnalogFrontEnd,
    D: DelayNs,
{
    pub fn new(
        front_end: A,
        delay: D,
        sample_interval: Duration,
        recalibration_interval: Duration,
        reference_samples: u16,
        initial_offset: i32,
    ) -> Self {
        Self {
            front_end,
            delay,
            sample_interval,
            recalibration_interval,
            reference_samples: reference_samples.max(1),
            offset: initial_offset,
            last_sample: None,
            last_calibration: None,
        }
    }

    /// Read one offset-corrected sample if the sample interval has elapsed.
    ///
    /// The first call always fires.
    pub fn acquire_if_due(&mut self, now: Instant) -> Option<RawReading> {
        if let Some(last) = self.last_sample {
            if now.saturating_duration_since(last) < self.sample_interval {
                return None;
            }
        }
        self.last_sample = Some(now);

        let raw = self.front_end.sample();
        Some(RawReading(raw.code().saturating_sub(self.offset)))
    }

    pub fn recalibration_due(&self, now: Instant) -> bool {
        match self.last_calibration {
            Some(last) => now.saturating_duration_since(last) >= self.recalibration_interval,
            None => true,
        }
    }

    /// Re-measure the DC offset when the recalibration interval has elapsed.
    pub fn recalibrate_if_due(&mut self, now: Instant) -> bool {
        if !self.recalibration_due(now) {
            return false;
        }
        self.recalibrate(now);
        true
    }

    /// Average the reference channel and adopt the result as the new offset.
    ///
    /// Blocks for `reference_samples` conversion periods.
    pub fn recalibrate(&mut self, now: Instant) {
        let count = self.reference_samples as i64;
        let pause_us = u32::try_from(self.sample_interval.as_micros()).unwrap_or(u32::MAX);

        let mut sum: i64 = 0;
        for i in 0..count {
            if i > 0 {
                self.delay.delay_us(pause_us);
            }
            sum += self.front_end.sample_reference().code() as i64;
        }
        let offset = (sum / count) as i32;

        if offset != self.offset {
            debug!("DC offset moved {} -> {} counts", self.offset, offset);
        }
        self.offset = offset;
        self.last_calibration = Some(now);
        info!("DC offset calibrated at {} counts", offset);
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn front_end_mut(&mut self) -> &mut A {
        &mut self.front_end
    }
}
