//! Driver context and the cooperative main loop step
//!
//! [`AppState`] owns every component and collaborator. The firmware (or the
//! simulator) calls [`AppState::tick`] as fast as it can with the current
//! time; each call does at most one sample, and once per measurement window
//! runs the detector, ledger and telemetry in that order.

use alloc::vec::Vec;

use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use crate::config::{ConfigError, MonitorConfig};
use crate::cycle::{CycleDetector, CycleEvent, CyclePhase};
use crate::display::{StatusSink, format_status};
use crate::metrics::{RmsAccumulator, RmsReading};
use crate::sampling::Sampler;
use crate::sensors::AnalogFrontEnd;
use crate::storage::{KeyValueStore, SessionCounter, StoreError, UsageLedger, UsageLedgerRecord};
use crate::telemetry::{CycleMetadata, Publisher, StateValue, TelemetryEmitter, TelemetryError};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Sessions cannot be tracked reliably without durable storage, so the
    /// monitor refuses to start.
    #[error("persistent storage unavailable: {0}")]
    StorageUnavailable(StoreError),
}

/// What happened in a tick that closed a measurement window.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub reading: RmsReading,
    pub phase: CyclePhase,
    pub events: Vec<CycleEvent>,
    pub session_id: u32,
    pub metadata: CycleMetadata,
}

/// Main application state container
pub struct AppState<A, D, S, P, O>
where
    A: AnalogFrontEnd,
    D: DelayNs,
    S: KeyValueStore,
    P: Publisher,
    O: StatusSink,
{
    sampler: Sampler<A, D>,
    accumulator: RmsAccumulator,
    detector: CycleDetector,
    ledger: UsageLedger,
    sessions: SessionCounter,
    telemetry: TelemetryEmitter,
    store: S,
    publisher: P,
    status: O,
    link_up: Option<bool>,
}

impl<A, D, S, P, O> AppState<A, D, S, P, O>
where
    A: AnalogFrontEnd,
    D: DelayNs,
    S: KeyValueStore,
    P: Publisher,
    O: StatusSink,
{
    /// Bring the monitor up.
    ///
    /// Durable state is loaded here and nowhere else; the cycle detector
    /// always starts `Idle`. Fails only on invalid configuration or a missing
    /// storage medium.
    pub fn start(
        config: &MonitorConfig,
        mut front_end: A,
        delay: D,
        mut store: S,
        mut publisher: P,
        status: O,
        now: Instant,
    ) -> Result<Self, AppError> {
        config.validate()?;

        store.begin().map_err(AppError::StorageUnavailable)?;
        let ledger = UsageLedger::load(&mut store);
        let sessions = SessionCounter::load(&mut store);

        front_end.set_mode(config.front_end);
        let mut sampler = Sampler::new(
            front_end,
            delay,
            config.sample_interval(),
            config.recalibration_interval(),
            config.reference_samples,
            config.calibration.initial_offset_counts,
        );
        sampler.recalibrate(now);

        let accumulator = RmsAccumulator::new(
            config.window(),
            config.front_end.gain.full_scale_volts(),
            config.calibration.clone(),
            now,
        );

        let telemetry = TelemetryEmitter::new(config.device_id.clone(), config.telemetry.clone());
        if let Err(e) = telemetry.register_last_will(&mut publisher) {
            warn!("No last will registered: {}", e);
        }

        info!(
            "Monitor started for {} (profile {}, threshold {:.2} A, end of cycle {} ms)",
            config.device_id,
            config.calibration.name,
            config.threshold_amps,
            config.end_of_cycle_ms
        );

        Ok(Self {
            sampler,
            accumulator,
            detector: CycleDetector::new(config.detector_params()),
            ledger,
            sessions,
            telemetry,
            store,
            publisher,
            status,
            link_up: None,
        })
    }

    /// Run one iteration of the driver loop.
    ///
    /// Returns a report when this tick closed a measurement window.
    pub fn tick(&mut self, now: Instant) -> Option<TickReport> {
        // The offset is only re-measured between cycles; a due recalibration
        // waits for the detector to return to Idle.
        if self.detector.phase() == CyclePhase::Idle {
            self.sampler.recalibrate_if_due(now);
        }

        if let Some(sample) = self.sampler.acquire_if_due(now) {
            self.accumulator.accumulate(sample);
        }

        let report = self
            .accumulator
            .finalize_if_due(now)
            .map(|reading| self.process_reading(reading));

        self.check_link();
        report
    }

    fn process_reading(&mut self, reading: RmsReading) -> TickReport {
        let now = reading.computed_at;
        let events = self.detector.update(&reading);

        let mut final_elapsed = None;
        for event in &events {
            match event {
                CycleEvent::Started { .. } => {
                    let session_id = self.sessions.next(&mut self.store);
                    self.ledger.start_cycle(&mut self.store);
                    info!("Session {} started", session_id);
                }
                CycleEvent::Ended {
                    elapsed_seconds, ..
                } => {
                    self.ledger.on_tick(&mut self.store, *elapsed_seconds);
                    final_elapsed = Some(*elapsed_seconds);
                    info!(
                        "Session {} ended, {} s total operating time",
                        self.sessions.session_id(),
                        self.ledger.cumulative_seconds()
                    );
                }
            }
        }

        let elapsed = self.detector.elapsed_seconds(now);
        if let Some(elapsed) = elapsed {
            self.ledger.on_tick(&mut self.store, elapsed);
        }

        let session_id = self.sessions.session_id();
        let metadata = CycleMetadata {
            cycle_elapsed_seconds: elapsed.or(final_elapsed).unwrap_or(0),
            cumulative_seconds: self.ledger.cumulative_seconds(),
        };

        for event in &events {
            let state = match event {
                CycleEvent::Started { .. } => StateValue::On,
                CycleEvent::Ended { .. } => StateValue::Off,
            };
            let result =
                self.telemetry
                    .publish_state_change(&mut self.publisher, state, session_id, metadata);
            log_publish_result("state change", result);
        }

        let result =
            self.telemetry
                .publish_reading(&mut self.publisher, &reading, session_id, metadata);
        log_publish_result("current reading", result);

        let phase = self.detector.phase();
        let line = format_status(phase, reading.amps, session_id, metadata.cumulative_seconds);
        self.status.show(&line);

        TickReport {
            reading,
            phase,
            events,
            session_id,
            metadata,
        }
    }

    fn check_link(&mut self) {
        let up = self.publisher.connected();
        if self.link_up == Some(up) {
            return;
        }
        if up {
            info!("Telemetry link up");
        } else {
            warn!("Telemetry link down, readings are dropped until it returns");
        }
        self.link_up = Some(up);
    }

    pub fn phase(&self) -> CyclePhase {
        self.detector.phase()
    }

    pub fn detector(&self) -> &CycleDetector {
        &self.detector
    }

    pub fn ledger_record(&self) -> UsageLedgerRecord {
        self.ledger.record()
    }

    pub fn session_id(&self) -> u32 {
        self.sessions.session_id()
    }

    pub fn missed_windows(&self) -> u32 {
        self.accumulator.missed_windows()
    }

    pub fn dc_offset(&self) -> i32 {
        self.sampler.offset()
    }

    pub fn telemetry(&self) -> &TelemetryEmitter {
        &self.telemetry
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn front_end_mut(&mut self) -> &mut A {
        self.sampler.front_end_mut()
    }
}

fn log_publish_result(what: &str, result: Result<(), TelemetryError>) {
    match result {
        Ok(()) => {}
        // Already reported once by the link check.
        Err(TelemetryError::Disconnected) => debug!("Dropped {}: link down", what),
        Err(e) => warn!("Dropped {}: {}", what, e),
    }
}
