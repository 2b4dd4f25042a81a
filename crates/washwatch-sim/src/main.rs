//! Desktop simulator for the washwatch appliance monitor.
//!
//! Runs the washwatch-core driver loop against a synthetic current signal
//! (a scripted wash program on a 50 Hz sine), persists state to a directory
//! on the host and logs every telemetry message instead of sending it.
//!
//! Simulated time advances one sample interval per loop iteration, so a
//! 15 minute run finishes in seconds unless `--realtime` is given.
//!
//! ```text
//! RUST_LOG=info washwatch-sim --duration 600
//! RUST_LOG=debug washwatch-sim --config monitor.json --offline
//! ```

mod file_store;
mod synthetic;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration as StdDuration;

use clap::Parser;
use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use log::{debug, error, info};

use washwatch_core::{AppState, MonitorConfig, Publisher, StatusSink};

use crate::file_store::FileStore;
use crate::synthetic::{SyntheticFrontEnd, wash_program};

#[derive(Parser, Debug)]
#[command(version, about = "Run the washwatch monitor against a synthetic wash program")]
struct Args {
    /// JSON monitor configuration; omitted fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the ledger and session counter
    #[arg(long, default_value = "washwatch-state")]
    state_dir: PathBuf,

    /// Simulated seconds to run
    #[arg(long, default_value_t = 900)]
    duration: u64,

    /// Report the telemetry link as down for the whole run
    #[arg(long)]
    offline: bool,

    /// Pace the loop against the wall clock
    #[arg(long)]
    realtime: bool,
}

// ---------------------------------------------------------------------------
// Host collaborators
// ---------------------------------------------------------------------------

/// Logs every message instead of sending it to a broker.
struct LogPublisher {
    online: bool,
    last_will: Option<(String, Vec<u8>)>,
}

impl LogPublisher {
    fn new(online: bool) -> Self {
        Self {
            online,
            last_will: None,
        }
    }

    /// Drop the link the way a power cut would: the broker sends the last
    /// will on our behalf. An offline link never reached a broker.
    fn close(&mut self) -> Option<(String, Vec<u8>)> {
        if !self.online {
            return None;
        }
        let will = self.last_will.take()?;
        info!(
            target: "telemetry",
            "{} <- {} (last will)",
            will.0,
            String::from_utf8_lossy(&will.1)
        );
        self.online = false;
        Some(will)
    }
}

impl Publisher for LogPublisher {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        if !self.online {
            return false;
        }
        info!(target: "telemetry", "{} <- {}", topic, String::from_utf8_lossy(payload));
        true
    }

    fn connected(&mut self) -> bool {
        self.online
    }

    fn set_last_will(&mut self, topic: &str, payload: &[u8]) {
        debug!(target: "telemetry", "Last will on {}: {}", topic, String::from_utf8_lossy(payload));
        self.last_will = Some((topic.to_owned(), payload.to_vec()));
    }
}

struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn show(&mut self, line: &str) {
        info!(target: "status", "{}", line);
    }
}

/// Blocks only in realtime mode; otherwise recalibration is instantaneous.
struct HostDelay {
    realtime: bool,
}

impl DelayNs for HostDelay {
    fn delay_ns(&mut self, ns: u32) {
        if self.realtime {
            std::thread::sleep(StdDuration::from_nanos(ns as u64));
        }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, String> {
    let Some(path) = path else {
        return Ok(MonitorConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let front_end = SyntheticFrontEnd::new(&config, wash_program());
    info!(
        "Starting washwatch simulator: {} s simulated, wash program of {} s, state in {}",
        args.duration,
        front_end.program_seconds(),
        args.state_dir.display()
    );

    let mut app = match AppState::start(
        &config,
        front_end,
        HostDelay {
            realtime: args.realtime,
        },
        FileStore::new(&args.state_dir),
        LogPublisher::new(!args.offline),
        ConsoleStatus,
        Instant::from_micros(0),
    ) {
        Ok(app) => app,
        Err(e) => {
            error!("Monitor failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    let step_us = config.sample_interval_us;
    let end_us = args.duration.saturating_mul(1_000_000);
    let mut now_us = 0;

    while now_us < end_us {
        let now = Instant::from_micros(now_us);
        app.front_end_mut().set_time(now);

        if let Some(report) = app.tick(now) {
            for event in &report.events {
                info!("Cycle event at {} s: {:?}", now.as_secs(), event);
            }
        }

        if args.realtime {
            std::thread::sleep(StdDuration::from_micros(step_us));
        }
        now_us += step_us;
    }

    app.publisher_mut().close();

    let record = app.ledger_record();
    info!(
        "Simulation finished in {:?} phase: session {}, {} s cumulative, {} messages sent, {} dropped, {} missed windows, offset {} counts, state in {}",
        app.phase(),
        app.session_id(),
        record.cumulative_seconds,
        app.telemetry().sent(),
        app.telemetry().dropped(),
        app.missed_windows(),
        app.dc_offset(),
        app.store().dir().display()
    );

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_sends_registered_last_will() {
        let mut publisher = LogPublisher::new(true);
        assert_eq!(publisher.close(), None);

        publisher.set_last_will("acs712/state", b"[]");
        assert_eq!(
            publisher.close(),
            Some(("acs712/state".to_owned(), b"[]".to_vec()))
        );
        assert!(!publisher.connected());
        assert_eq!(publisher.close(), None);
    }

    #[test]
    fn test_offline_link_has_no_last_will_to_send() {
        let mut publisher = LogPublisher::new(false);
        publisher.set_last_will("acs712/state", b"[]");
        assert_eq!(publisher.close(), None);
    }

    #[test]
    fn test_monitor_registers_last_will_with_publisher() {
        let config = MonitorConfig::default();
        let dir = std::env::temp_dir().join(format!("washwatch-sim-will-{}", std::process::id()));
        let mut app = AppState::start(
            &config,
            SyntheticFrontEnd::new(&config, wash_program()),
            HostDelay { realtime: false },
            FileStore::new(&dir),
            LogPublisher::new(true),
            ConsoleStatus,
            Instant::from_micros(0),
        )
        .unwrap();

        let (topic, payload) = app.publisher_mut().close().unwrap();
        assert_eq!(topic, "acs712/state");
        assert_eq!(payload, br#"[{"variable":"state","value":"offline"}]"#.to_vec());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
