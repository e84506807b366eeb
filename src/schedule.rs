//! When step passes run: on every display refresh, or on a fixed wall-clock
//! period.

use std::cell::Cell;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::engine::EngineState;
use crate::pass::PassReport;

pub const DEFAULT_REFRESH_HZ: u32 = 60;

/// Discrete speed presets for timer-driven playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speed {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl Speed {
    pub fn period(self) -> Duration {
        match self {
            Self::Slow => Duration::from_millis(500),
            Self::Medium => Duration::from_millis(200),
            Self::Fast => Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every refresh opportunity of a display running at `refresh_hz`.
    Continuous { refresh_hz: u32 },
    /// Fixed wall-clock period.
    Interval(Duration),
}

impl Schedule {
    pub fn continuous() -> Self {
        Self::Continuous {
            refresh_hz: DEFAULT_REFRESH_HZ,
        }
    }

    pub fn from_speed(speed: Speed) -> Self {
        Self::Interval(speed.period())
    }

    pub fn period(self) -> Duration {
        match self {
            Self::Continuous { refresh_hz } => {
                Duration::from_nanos(1_000_000_000 / u64::from(refresh_hz.max(1)))
            }
            Self::Interval(period) => period,
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::continuous()
    }
}

/// Source of time for [`drive`]. Tests substitute a clock that advances
/// instantly.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep_until(&self, deadline: Instant);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }
}

/// Clock that only moves when slept on.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Instant) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

/// Decides when the next pass is due.
///
/// At most one pass fires per poll. If the caller fell behind by several
/// periods the missed ones are dropped and the timer restarts from the
/// current time; passes are never queued.
#[derive(Debug, Clone)]
pub struct Ticker {
    schedule: Schedule,
    next_due: Option<Instant>,
}

impl Ticker {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            next_due: None,
        }
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Swap the schedule and clear the pending timer.
    pub fn set_schedule(&mut self, schedule: Schedule) {
        self.schedule = schedule;
        self.reset();
    }

    /// Forget the pending deadline; the next poll fires immediately.
    pub fn reset(&mut self) {
        self.next_due = None;
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now < due => false,
            _ => {
                self.next_due = Some(now + self.schedule.period());
                true
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveSummary {
    pub passes: u64,
    pub faults: usize,
}

/// Run scheduled step passes until `max_passes` have run or the engine is
/// stopped (possibly by `on_pass`).
///
/// `on_pass` sees the canvas between passes, which is where frames are
/// recorded or the cursor readout refreshed.
pub fn drive<C, F>(
    engine: &mut EngineState,
    ticker: &mut Ticker,
    max_passes: u64,
    clock: &C,
    mut on_pass: F,
) -> Result<DriveSummary>
where
    C: Clock + ?Sized,
    F: FnMut(&mut EngineState, &PassReport) -> Result<()>,
{
    let mut summary = DriveSummary::default();

    while engine.is_running() && summary.passes < max_passes {
        let now = clock.now();
        if !ticker.poll(now) {
            if let Some(due) = ticker.next_due() {
                clock.sleep_until(due);
            }
            continue;
        }

        let ticket = engine.schedule_pass();
        let Some(report) = engine.run_scheduled(ticket) else {
            break;
        };
        summary.passes += 1;
        summary.faults += report.faults;
        on_pass(engine, &report)?;
    }

    debug!(
        "drive finished: {} pass(es), {} fault(s)",
        summary.passes, summary.faults
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::FormulaLayout;

    #[test]
    fn presets_match_timer_periods() {
        assert_eq!(Speed::Slow.period(), Duration::from_millis(500));
        assert_eq!(Speed::Medium.period(), Duration::from_millis(200));
        assert_eq!(Speed::Fast.period(), Duration::from_millis(100));
        assert_eq!(
            Schedule::Continuous { refresh_hz: 50 }.period(),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn ticker_fires_once_per_period() {
        let start = Instant::now();
        let mut ticker = Ticker::new(Schedule::Interval(Duration::from_millis(100)));
        assert!(ticker.poll(start));
        assert!(!ticker.poll(start + Duration::from_millis(99)));
        assert!(ticker.poll(start + Duration::from_millis(100)));
    }

    #[test]
    fn ticker_drops_missed_periods() {
        let start = Instant::now();
        let mut ticker = Ticker::new(Schedule::Interval(Duration::from_millis(100)));
        assert!(ticker.poll(start));

        let late = start + Duration::from_millis(450);
        assert!(ticker.poll(late));
        assert!(!ticker.poll(late), "missed periods must not queue up");
        assert_eq!(ticker.next_due(), Some(late + Duration::from_millis(100)));
    }

    #[test]
    fn changing_schedule_clears_timer() {
        let start = Instant::now();
        let mut ticker = Ticker::new(Schedule::from_speed(Speed::Slow));
        assert!(ticker.poll(start));
        ticker.set_schedule(Schedule::from_speed(Speed::Fast));
        assert!(ticker.poll(start + Duration::from_millis(1)));
    }

    #[test]
    fn drive_respects_budget_and_timing() {
        let mut engine = EngineState::new(2, 2, FormulaLayout::Full).expect("engine");
        let mut ticker = Ticker::new(Schedule::from_speed(Speed::Fast));
        let clock = ManualClock::new();
        let started = clock.now();
        engine.play();

        let summary = drive(&mut engine, &mut ticker, 5, &clock, |_, _| Ok(())).expect("drive");
        assert_eq!(summary.passes, 5);
        assert_eq!(engine.step_passes(), 5);
        assert_eq!(clock.now() - started, Duration::from_millis(400));
    }

    #[test]
    fn drive_stops_when_callback_pauses() {
        let mut engine = EngineState::new(2, 2, FormulaLayout::Full).expect("engine");
        let mut ticker = Ticker::new(Schedule::continuous());
        let clock = ManualClock::new();
        engine.play();

        let summary = drive(&mut engine, &mut ticker, 100, &clock, |engine, _| {
            if engine.step_passes() == 3 {
                engine.stop();
            }
            Ok(())
        })
        .expect("drive");

        assert_eq!(summary.passes, 3);
        assert!(!engine.is_running());
    }

    #[test]
    fn drive_does_nothing_while_idle() {
        let mut engine = EngineState::new(2, 2, FormulaLayout::Full).expect("engine");
        let mut ticker = Ticker::new(Schedule::continuous());
        let summary =
            drive(&mut engine, &mut ticker, 10, &ManualClock::new(), |_, _| Ok(())).expect("drive");
        assert_eq!(summary.passes, 0);
    }
}
