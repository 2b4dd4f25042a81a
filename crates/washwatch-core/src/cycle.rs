//! Appliance cycle detection
//!
//! A washing machine draws current in bursts: the drum turns, stops, turns
//! the other way, pauses to fill or drain. Switching on is therefore accepted
//! on the first reading at or above the threshold, while switching off needs
//! `end_of_cycle` of uninterrupted sub-threshold current. Without that
//! asymmetry a single wash would be split into dozens of sessions.
//!
//! ```text
//!            amps >= threshold
//!   Idle ─────────────────────────▶ Running ◀─────┐
//!    ▲                                │           │ amps >= threshold
//!    │                 amps < threshold           │
//!    │                                ▼           │
//!    └──────────────────────────── Cooldown ──────┘
//!      now - last_active >= end_of_cycle
//! ```
//!
//! [`transition`] is a pure function so every edge can be tested without
//! timing side effects; [`CycleDetector`] merely owns the live state.

use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use log::info;

use crate::metrics::RmsReading;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub threshold_amps: f32,
    pub end_of_cycle: Duration,
}

/// Live detector state.
///
/// `last_active` is the time of the most recent reading at or above the
/// threshold. Sub-threshold time is measured from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Running {
        session_start: Instant,
        last_active: Instant,
    },
    Cooldown {
        session_start: Instant,
        last_active: Instant,
    },
}

/// [`CycleState`] without its timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Running,
    Cooldown,
}

impl CyclePhase {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Cooldown => "cooldown",
        }
    }
}

impl CycleState {
    pub const fn phase(&self) -> CyclePhase {
        match self {
            Self::Idle => CyclePhase::Idle,
            Self::Running { .. } => CyclePhase::Running,
            Self::Cooldown { .. } => CyclePhase::Cooldown,
        }
    }

    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub const fn session_start(&self) -> Option<Instant> {
        match self {
            Self::Idle => None,
            Self::Running { session_start, .. } | Self::Cooldown { session_start, .. } => {
                Some(*session_start)
            }
        }
    }

    /// Whole seconds since the session started, `None` while idle.
    pub fn elapsed_seconds(&self, now: Instant) -> Option<u64> {
        self.session_start()
            .map(|start| now.saturating_duration_since(start).as_secs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// Current crossed the threshold from idle
    Started { at: Instant },
    /// Cooldown ran out without activity
    Ended { at: Instant, elapsed_seconds: u64 },
}

/// Compute the next state for one reading.
pub fn transition(
    state: CycleState,
    reading: &RmsReading,
    params: &DetectorParams,
) -> (CycleState, Vec<CycleEvent>) {
    let now = reading.computed_at;
    let active = reading.amps >= params.threshold_amps;
    let mut events = Vec::new();

    let next = match state {
        CycleState::Idle if active => {
            events.push(CycleEvent::Started { at: now });
            CycleState::Running {
                session_start: now,
                last_active: now,
            }
        }
        CycleState::Idle => CycleState::Idle,

        CycleState::Running { session_start, .. } | CycleState::Cooldown { session_start, .. }
            if active =>
        {
            CycleState::Running {
                session_start,
                last_active: now,
            }
        }

        CycleState::Running {
            session_start,
            last_active,
        }
        | CycleState::Cooldown {
            session_start,
            last_active,
        } => {
            if now.saturating_duration_since(last_active) >= params.end_of_cycle {
                events.push(CycleEvent::Ended {
                    at: now,
                    elapsed_seconds: now.saturating_duration_since(session_start).as_secs(),
                });
                CycleState::Idle
            } else {
                CycleState::Cooldown {
                    session_start,
                    last_active,
                }
            }
        }
    };

    (next, events)
}

/// Owns the live [`CycleState`] and applies [`transition`] to each reading.
pub struct CycleDetector {
    state: CycleState,
    params: DetectorParams,
}

impl CycleDetector {
    /// Detector in `Idle`; state is never restored across restarts.
    pub fn new(params: DetectorParams) -> Self {
        Self {
            state: CycleState::Idle,
            params,
        }
    }

    pub fn update(&mut self, reading: &RmsReading) -> Vec<CycleEvent> {
        let previous = self.state.phase();
        let (next, events) = transition(self.state, reading, &self.params);
        self.state = next;

        for event in &events {
            match event {
                CycleEvent::Started { .. } => {
                    info!("Cycle started at {:.3} A", reading.amps)
                }
                CycleEvent::Ended {
                    elapsed_seconds, ..
                } => info!("Cycle ended after {} s", elapsed_seconds),
            }
        }
        if previous == CyclePhase::Running && next.phase() == CyclePhase::Cooldown {
            info!("Current below threshold, cooldown started");
        }

        events
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn phase(&self) -> CyclePhase {
        self.state.phase()
    }

    pub fn elapsed_seconds(&self, now: Instant) -> Option<u64> {
        self.state.elapsed_seconds(now)
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }
}
