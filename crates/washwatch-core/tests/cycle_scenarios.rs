//! End-to-end monitor scenarios
//!
//! A square-wave front end stands in for the current transformer: the
//! amplitude chosen per window sets the RMS reading directly, so a test can
//! script a wash program one second at a time and then check the detector
//! events, the durable ledger and the messages that reached the transport.

use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use serde_json::Value;

use washwatch_core::display::NoStatus;
use washwatch_core::storage::LEDGER_KEY;
use washwatch_core::{
    AnalogFrontEnd, AppError, AppState, CycleEvent, CyclePhase, FrontEndMode, MemoryStore,
    MonitorConfig, Publisher, RawReading, TickReport,
};

/// Bias of the current-sense output at zero current
const MID_SCALE: i32 = 13200;

/// 2000 counts at the ±6.144 V range is 0.375 V rms, about 3.43 A
const ACTIVE: i32 = 2000;

/// 400 counts is about 0.13 A, under the 0.5 A threshold
const TRICKLE: i32 = 400;

const QUIET: i32 = 0;

const SAMPLE_US: u64 = 1160;

struct SquareWave {
    amplitude: i32,
    high: bool,
}

impl SquareWave {
    fn new() -> Self {
        Self {
            amplitude: QUIET,
            high: false,
        }
    }
}

impl AnalogFrontEnd for SquareWave {
    fn sample(&mut self) -> RawReading {
        self.high = !self.high;
        if self.high {
            RawReading(MID_SCALE + self.amplitude)
        } else {
            RawReading(MID_SCALE - self.amplitude)
        }
    }

    fn sample_reference(&mut self) -> RawReading {
        RawReading(MID_SCALE)
    }

    fn set_mode(&mut self, _mode: FrontEndMode) {}
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Default)]
struct RecordingPublisher {
    offline: bool,
    messages: Vec<(String, Value)>,
}

impl RecordingPublisher {
    fn on_topic(&self, topic: &str) -> Vec<&Value> {
        self.messages
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, v)| &v[0])
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        let value = serde_json::from_slice(payload).expect("payload is JSON");
        self.messages.push((topic.to_string(), value));
        true
    }

    fn connected(&mut self) -> bool {
        !self.offline
    }
}

type Monitor<'a> =
    AppState<SquareWave, NoDelay, &'a mut MemoryStore, &'a mut RecordingPublisher, NoStatus>;

/// Simulated clock shared across restarts of the monitor.
struct Clock {
    now_us: u64,
}

impl Clock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.now_us)
    }
}

fn start<'a>(
    store: &'a mut MemoryStore,
    publisher: &'a mut RecordingPublisher,
    clock: &Clock,
) -> Result<Monitor<'a>, AppError> {
    AppState::start(
        &MonitorConfig::default(),
        SquareWave::new(),
        NoDelay,
        store,
        publisher,
        NoStatus,
        clock.now(),
    )
}

/// Drive the loop until the next measurement window closes.
fn run_window(monitor: &mut Monitor<'_>, clock: &mut Clock, amplitude: i32) -> TickReport {
    monitor.front_end_mut().amplitude = amplitude;
    loop {
        let report = monitor.tick(clock.now());
        clock.now_us += SAMPLE_US;
        if let Some(report) = report {
            return report;
        }
    }
}

fn run_program(monitor: &mut Monitor<'_>, clock: &mut Clock, amplitudes: &[i32]) -> Vec<TickReport> {
    amplitudes
        .iter()
        .map(|&amplitude| run_window(monitor, clock, amplitude))
        .collect()
}

fn events(reports: &[TickReport]) -> Vec<(usize, CycleEvent)> {
    reports
        .iter()
        .enumerate()
        .flat_map(|(i, r)| r.events.iter().map(move |e| (i, *e)))
        .collect()
}

#[test]
fn test_short_pauses_do_not_split_the_cycle() {
    let mut store = MemoryStore::new();
    let mut publisher = RecordingPublisher::default();
    let mut clock = Clock { now_us: 0 };
    let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();

    let reports = run_program(
        &mut monitor,
        &mut clock,
        &[QUIET, ACTIVE, ACTIVE, TRICKLE, TRICKLE, ACTIVE],
    );

    let events = events(&reports);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, 1);
    assert!(matches!(events[0].1, CycleEvent::Started { .. }));

    let phases: Vec<CyclePhase> = reports.iter().map(|r| r.phase).collect();
    assert_eq!(
        phases,
        vec![
            CyclePhase::Idle,
            CyclePhase::Running,
            CyclePhase::Running,
            CyclePhase::Cooldown,
            CyclePhase::Cooldown,
            CyclePhase::Running,
        ]
    );
    assert_eq!(monitor.session_id(), 1);
}

#[test]
fn test_six_quiet_seconds_end_the_cycle() {
    let mut store = MemoryStore::new();
    let mut publisher = RecordingPublisher::default();
    let mut clock = Clock { now_us: 0 };
    let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();

    let reports = run_program(
        &mut monitor,
        &mut clock,
        &[ACTIVE, TRICKLE, TRICKLE, TRICKLE, TRICKLE, TRICKLE, TRICKLE],
    );

    let events = events(&reports);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, 0);
    assert!(matches!(events[0].1, CycleEvent::Started { .. }));
    assert_eq!(events[1].0, 6);
    assert!(matches!(
        events[1].1,
        CycleEvent::Ended {
            elapsed_seconds: 6,
            ..
        }
    ));

    let last = reports.last().unwrap();
    assert_eq!(last.phase, CyclePhase::Idle);
    assert_eq!(last.metadata.cycle_elapsed_seconds, 6);
    assert_eq!(last.metadata.cumulative_seconds, 6);
    assert_eq!(monitor.ledger_record().cumulative_seconds, 6);
}

#[test]
fn test_published_messages_follow_the_cycle() {
    let mut store = MemoryStore::new();
    let mut publisher = RecordingPublisher::default();
    let mut clock = Clock { now_us: 0 };
    let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();

    run_program(
        &mut monitor,
        &mut clock,
        &[QUIET, ACTIVE, QUIET, QUIET, QUIET, QUIET, QUIET, QUIET],
    );
    assert_eq!(monitor.telemetry().dropped(), 0);
    drop(monitor);

    let states = publisher.on_topic("acs712/state");
    assert_eq!(states.len(), 2);
    assert_eq!(states[0]["value"], "1");
    assert_eq!(states[0]["group"], "1");
    assert_eq!(states[1]["value"], "2");
    assert_eq!(states[1]["metadata"]["cycle_elapsed_seconds"], 6);

    let readings = publisher.on_topic("acs712");
    assert_eq!(readings.len(), 8);
    assert_eq!(readings[0]["value"], 0);
    assert_eq!(readings[0]["group"], "0");
    assert_eq!(readings[1]["unit"], "mA");
    assert!(readings[1]["value"].as_u64().unwrap() > 3000);
    assert_eq!(readings[1]["metadata"]["device_id"], "wasmachine 1");

    // The state record precedes the reading of the same window.
    let topics: Vec<&str> = publisher.messages.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(&topics[1..3], &["acs712/state", "acs712"]);
}

#[test]
fn test_session_ids_survive_restart() {
    let mut store = MemoryStore::new();
    let mut publisher = RecordingPublisher::default();
    let mut clock = Clock { now_us: 0 };

    let program = [ACTIVE, QUIET, QUIET, QUIET, QUIET, QUIET, QUIET];
    {
        let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();
        run_program(&mut monitor, &mut clock, &program);
        assert_eq!(monitor.session_id(), 1);
    }
    {
        let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();
        assert_eq!(monitor.session_id(), 1);
        assert_eq!(monitor.phase(), CyclePhase::Idle);

        run_program(&mut monitor, &mut clock, &program);
        assert_eq!(monitor.session_id(), 2);
        assert_eq!(monitor.ledger_record().cumulative_seconds, 12);
    }
}

#[test]
fn test_restart_mid_cycle_keeps_counted_time() {
    let mut store = MemoryStore::new();
    let mut publisher = RecordingPublisher::default();
    let mut clock = Clock { now_us: 0 };

    {
        let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();
        run_program(&mut monitor, &mut clock, &[ACTIVE, ACTIVE, ACTIVE, ACTIVE]);
        assert_eq!(monitor.ledger_record().cumulative_seconds, 3);
    }

    // Power comes back: the interrupted cycle is not resumed, a new one starts.
    let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();
    assert_eq!(monitor.ledger_record().cumulative_seconds, 3);
    assert_eq!(monitor.ledger_record().last_update_seconds, 3);

    let reports = run_program(&mut monitor, &mut clock, &[ACTIVE, ACTIVE, ACTIVE]);
    assert!(matches!(
        reports[0].events.as_slice(),
        [CycleEvent::Started { .. }]
    ));
    assert_eq!(monitor.session_id(), 2);
    assert_eq!(monitor.ledger_record().cumulative_seconds, 5);
}

#[test]
fn test_missing_storage_is_fatal() {
    let mut store = MemoryStore::new();
    store.set_available(false);
    let mut publisher = RecordingPublisher::default();
    let clock = Clock { now_us: 0 };

    let result = start(&mut store, &mut publisher, &clock);
    assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
}

#[test]
fn test_corrupt_ledger_starts_from_zero() {
    let mut store = MemoryStore::new();
    store.insert_raw(LEDGER_KEY, b"not a ledger");
    let mut publisher = RecordingPublisher::default();
    let mut clock = Clock { now_us: 0 };

    let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();
    assert_eq!(monitor.ledger_record().cumulative_seconds, 0);

    run_program(&mut monitor, &mut clock, &[ACTIVE, ACTIVE, ACTIVE]);
    assert_eq!(monitor.ledger_record().cumulative_seconds, 2);
}

#[test]
fn test_detection_continues_while_offline() {
    let mut store = MemoryStore::new();
    let mut publisher = RecordingPublisher {
        offline: true,
        ..Default::default()
    };
    let mut clock = Clock { now_us: 0 };
    let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();

    let reports = run_program(
        &mut monitor,
        &mut clock,
        &[ACTIVE, QUIET, QUIET, QUIET, QUIET, QUIET, QUIET],
    );
    assert_eq!(events(&reports).len(), 2);
    assert_eq!(monitor.ledger_record().cumulative_seconds, 6);
    // 7 readings and 2 state records, all dropped
    assert_eq!(monitor.telemetry().dropped(), 9);
    assert_eq!(monitor.telemetry().sent(), 0);
    drop(monitor);

    assert!(publisher.messages.is_empty());
}

#[test]
fn test_store_write_failures_do_not_stop_the_monitor() {
    let mut store = MemoryStore::new();
    store.fail_writes(true);
    let mut publisher = RecordingPublisher::default();
    let mut clock = Clock { now_us: 0 };
    let mut monitor = start(&mut store, &mut publisher, &clock).unwrap();

    run_program(&mut monitor, &mut clock, &[ACTIVE, ACTIVE, ACTIVE]);
    assert_eq!(monitor.session_id(), 1);
    assert_eq!(monitor.ledger_record().cumulative_seconds, 2);
    drop(monitor);

    assert!(store.get(LEDGER_KEY).is_none());
}
