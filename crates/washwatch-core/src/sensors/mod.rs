//! Analog front end abstraction
//!
//! The current-sense circuit is read through a 16-bit ADC in continuous
//! mode. The core only needs a signed code per acquisition on the signal
//! channel and the idle `vdd/2` reference channel; everything electrical
//! beyond sample timing belongs to the implementation.

use serde::Deserialize;

/// One signed ADC code.
///
/// Before offset removal this is the absolute channel code; after
/// [`crate::Sampler`] has removed the DC bias it is centred on zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct RawReading(pub i32);

impl RawReading {
    pub const fn code(self) -> i32 {
        self.0
    }
}

impl From<i32> for RawReading {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Programmable gain amplifier setting, named after the full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Gain {
    #[default]
    FullScale6V144,
    FullScale4V096,
    FullScale2V048,
    FullScale1V024,
    FullScale0V512,
    FullScale0V256,
}

impl Gain {
    /// Full-scale input range in volts
    pub const fn full_scale_volts(self) -> f32 {
        match self {
            Self::FullScale6V144 => 6.144,
            Self::FullScale4V096 => 4.096,
            Self::FullScale2V048 => 2.048,
            Self::FullScale1V024 => 1.024,
            Self::FullScale0V512 => 0.512,
            Self::FullScale0V256 => 0.256,
        }
    }
}

/// Output data rate in samples per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DataRate {
    Sps8,
    Sps16,
    Sps32,
    Sps64,
    Sps128,
    Sps250,
    Sps475,
    #[default]
    Sps860,
}

impl DataRate {
    pub const fn samples_per_second(self) -> u32 {
        match self {
            Self::Sps8 => 8,
            Self::Sps16 => 16,
            Self::Sps32 => 32,
            Self::Sps64 => 64,
            Self::Sps128 => 128,
            Self::Sps250 => 250,
            Self::Sps475 => 475,
            Self::Sps860 => 860,
        }
    }

    /// Time between two distinct conversions, rounded up to whole microseconds.
    ///
    /// Polling faster than this only returns the previous conversion again.
    pub const fn conversion_period_us(self) -> u64 {
        let sps = self.samples_per_second() as u64;
        1_000_000_u64.div_ceil(sps)
    }
}

/// Front end configuration applied once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrontEndMode {
    pub gain: Gain,
    pub data_rate: DataRate,
    /// Continuous conversion (`true`) or single shot
    pub continuous: bool,
}

impl FrontEndMode {
    /// 6.144 V range, fastest rate, continuous conversion.
    pub const fn current_sense() -> Self {
        Self {
            gain: Gain::FullScale6V144,
            data_rate: DataRate::Sps860,
            continuous: true,
        }
    }
}

impl Default for FrontEndMode {
    fn default() -> Self {
        Self::current_sense()
    }
}

/// Analog front end collaborator.
///
/// Reads are treated as infallible: a hardware fault at this layer is out of
/// scope for the monitor and is the implementation's business.
pub trait AnalogFrontEnd {
    /// Read the latest conversion of the current-sense channel.
    fn sample(&mut self) -> RawReading;

    /// Read the idle reference channel carrying the `vdd/2` bias.
    fn sample_reference(&mut self) -> RawReading;

    /// Apply the conversion settings.
    fn set_mode(&mut self, mode: FrontEndMode);
}

impl<T: AnalogFrontEnd + ?Sized> AnalogFrontEnd for &mut T {
    fn sample(&mut self) -> RawReading {
        (**self).sample()
    }

    fn sample_reference(&mut self) -> RawReading {
        (**self).sample_reference()
    }

    fn set_mode(&mut self, mode: FrontEndMode) {
        (**self).set_mode(mode)
    }
}
