//! Hardware-independent core library for washwatch
//!
//! This crate contains the platform-agnostic logic of the washing-machine
//! current monitor: periodic ADC sampling with DC-offset removal, RMS current
//! computation, the hysteresis cycle detector, durable usage accounting, and
//! telemetry payload generation.
//!
//! Hardware and network access go through the collaborator traits
//! [`AnalogFrontEnd`], [`KeyValueStore`], [`Publisher`] and [`StatusSink`],
//! so the same code runs on the device and on desktop hosts (for the
//! simulator and tests).
//!
//! It is `#![no_std]` with `extern crate alloc`.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod config;
pub mod cycle;
pub mod display;
pub mod metrics;
pub mod sampling;
pub mod sensors;
pub mod storage;
pub mod telemetry;

pub use app_state::{AppError, AppState, TickReport};
pub use config::{CalibrationProfile, ConfigError, MonitorConfig, TelemetryConfig};
pub use cycle::{CycleDetector, CycleEvent, CyclePhase, CycleState, DetectorParams};
pub use display::StatusSink;
pub use metrics::{RmsAccumulator, RmsReading, Window};
pub use sampling::Sampler;
pub use sensors::{AnalogFrontEnd, DataRate, FrontEndMode, Gain, RawReading};
pub use storage::{
    KeyValueStore, MemoryStore, RecordError, SessionCounter, StoreError, UsageLedger,
    UsageLedgerRecord,
};
pub use telemetry::{CycleMetadata, Publisher, StateValue, TelemetryEmitter, TelemetryError};
