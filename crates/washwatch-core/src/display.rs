//! Status line output
//!
//! The display (or serial console) only ever receives formatted text. It is
//! observational: nothing the core does depends on it.

use core::fmt::Write;

use crate::cycle::CyclePhase;

pub const STATUS_LINE_CAPACITY: usize = 64;

pub type StatusLine = heapless::String<STATUS_LINE_CAPACITY>;

/// Display or log collaborator
pub trait StatusSink {
    fn show(&mut self, line: &str);
}

impl<T: StatusSink + ?Sized> StatusSink for &mut T {
    fn show(&mut self, line: &str) {
        (**self).show(line)
    }
}

/// Sink that discards everything, for headless builds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStatus;

impl StatusSink for NoStatus {
    fn show(&mut self, _line: &str) {}
}

/// Writer that stops at capacity instead of failing the whole line.
struct Truncating<'a>(&'a mut StatusLine);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// e.g. `running #12 2.150 A 5025 s`
pub fn format_status(
    phase: CyclePhase,
    amps: f32,
    session_id: u32,
    cumulative_seconds: u64,
) -> StatusLine {
    let mut line = StatusLine::new();
    let _ = write!(
        Truncating(&mut line),
        "{} #{} {:.3} A {} s",
        phase.label(),
        session_id,
        amps,
        cumulative_seconds
    );
    line
}
