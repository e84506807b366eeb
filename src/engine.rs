//! Play/pause controller that owns the canvas and the active formulas.

use anyhow::{Context, Result};
use log::info;

use crate::cursor::{Cursor, PixelReadout};
use crate::pass::{self, PassReport};
use crate::raster::Raster;
use crate::slots::{FormulaLayout, FormulaSet, SlotError, SlotId};

pub const DEFAULT_STEP: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    Running,
}

/// Permission to run one step pass, handed out by
/// [`EngineState::schedule_pass`]. Any `play`/`stop` after it was issued
/// makes it stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct PassTicket {
    generation: u64,
}

/// Everything one canvas session mutates: the raster, the six formula
/// slots, the step scalar, the play state and the cursor.
///
/// Formula and step changes land between passes; a pass borrows the raster
/// mutably for its whole duration.
#[derive(Debug, Clone)]
pub struct EngineState {
    raster: Raster,
    formulas: FormulaSet,
    step: i64,
    state: PlayState,
    generation: u64,
    cursor: Cursor,
    step_passes: u64,
}

impl EngineState {
    /// A seeded canvas with default formulas for `layout`.
    pub fn new(width: u32, height: u32, layout: FormulaLayout) -> Result<Self> {
        Self::with_formulas(width, height, FormulaSet::new(layout)?)
    }

    /// A canvas seeded once from an already populated formula set.
    pub fn with_formulas(width: u32, height: u32, formulas: FormulaSet) -> Result<Self> {
        let raster = Raster::new(width, height).context("failed to allocate canvas")?;
        let mut engine = Self {
            raster,
            formulas,
            step: DEFAULT_STEP,
            state: PlayState::Idle,
            generation: 0,
            cursor: Cursor::default(),
            step_passes: 0,
        };
        engine.reset();
        Ok(engine)
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn formulas(&self) -> &FormulaSet {
        &self.formulas
    }

    pub fn play_state(&self) -> PlayState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PlayState::Running
    }

    pub fn step_scalar(&self) -> i64 {
        self.step
    }

    /// Step passes run since the last seed.
    pub fn step_passes(&self) -> u64 {
        self.step_passes
    }

    pub fn play(&mut self) {
        if self.state == PlayState::Running {
            return;
        }
        self.state = PlayState::Running;
        self.generation += 1;
        info!("playing (step {})", self.step);
    }

    /// Halt scheduling. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.state == PlayState::Idle {
            return;
        }
        self.state = PlayState::Idle;
        self.generation += 1;
        info!("stopped after {} step pass(es)", self.step_passes);
    }

    pub fn toggle(&mut self) -> PlayState {
        match self.state {
            PlayState::Idle => self.play(),
            PlayState::Running => self.stop(),
        }
        self.state
    }

    /// Re-run the seed pass. Play state is left alone.
    pub fn reset(&mut self) -> PassReport {
        self.step_passes = 0;
        pass::seed(&mut self.raster, &self.formulas)
    }

    pub fn set_formula(&mut self, slot: SlotId, text: &str) -> Result<(), SlotError> {
        self.formulas.set(slot, text)
    }

    /// Apply a batch of edits; returns the rejected ones.
    pub fn set_formulas<'a>(
        &mut self,
        edits: impl IntoIterator<Item = (SlotId, &'a str)>,
    ) -> Vec<SlotError> {
        self.formulas.set_many(edits)
    }

    /// Switch parameter layout. All slots return to the layout's defaults.
    pub fn set_layout(&mut self, layout: FormulaLayout) -> Result<(), SlotError> {
        if layout != self.formulas.layout() {
            self.formulas.set_layout(layout)?;
            info!("formula layout is now {}", layout.label());
        }
        Ok(())
    }

    pub fn set_step(&mut self, step: i64) {
        self.step = step;
    }

    /// Reallocate the canvas and reseed it, as a window resize does.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<PassReport> {
        self.raster
            .resize(width, height)
            .with_context(|| format!("failed to resize canvas to {width}x{height}"))?;
        self.cursor.retain_within(width, height);
        Ok(self.reset())
    }

    /// One step pass if running.
    pub fn tick(&mut self) -> Option<PassReport> {
        if !self.is_running() {
            return None;
        }
        Some(self.step_once())
    }

    /// One step pass regardless of play state.
    pub fn step_once(&mut self) -> PassReport {
        self.step_passes += 1;
        pass::step(&mut self.raster, &self.formulas, self.step)
    }

    pub fn schedule_pass(&self) -> PassTicket {
        PassTicket {
            generation: self.generation,
        }
    }

    /// Run a previously scheduled pass, unless play state changed since it
    /// was scheduled.
    pub fn run_scheduled(&mut self, ticket: PassTicket) -> Option<PassReport> {
        if ticket.generation != self.generation {
            return None;
        }
        self.tick()
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> (&mut Cursor, u32, u32) {
        (&mut self.cursor, self.raster.width(), self.raster.height())
    }

    pub fn readout(&self) -> Option<PixelReadout> {
        self.cursor.readout(&self.raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Direction;

    fn engine() -> EngineState {
        EngineState::new(4, 3, FormulaLayout::Full).expect("engine")
    }

    #[test]
    fn prepared_formulas_seed_the_first_frame() {
        let mut formulas = FormulaSet::new(FormulaLayout::Full).expect("defaults");
        formulas
            .set(SlotId::start(crate::slots::Channel::Blue), "7")
            .expect("constant");
        let engine = EngineState::with_formulas(2, 2, formulas).expect("engine");

        assert_eq!(engine.raster().rgba(1, 1), Some([2, 2, 7, 255]));
        assert_eq!(engine.step_passes(), 0);
        assert!(!engine.is_running());
    }

    #[test]
    fn new_engine_is_seeded_and_idle() {
        let engine = engine();
        assert_eq!(engine.play_state(), PlayState::Idle);
        assert_eq!(engine.raster().rgba(3, 2), Some([5, 5, 5, 255]));
    }

    #[test]
    fn tick_only_runs_while_playing() {
        let mut engine = engine();
        assert!(engine.tick().is_none());
        engine.play();
        assert!(engine.tick().is_some());
        assert_eq!(engine.raster().rgba(0, 0), Some([1, 1, 1, 255]));
        engine.stop();
        assert!(engine.tick().is_none());
        assert_eq!(engine.step_passes(), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut engine = engine();
        engine.play();
        engine.stop();
        let ticket = engine.schedule_pass();
        engine.stop();
        engine.play();
        engine.stop();
        engine.stop();
        assert_eq!(engine.play_state(), PlayState::Idle);
        assert!(engine.run_scheduled(ticket).is_none());
    }

    #[test]
    fn stale_ticket_is_skipped_after_stop() {
        let mut engine = engine();
        engine.play();
        let first = engine.schedule_pass();
        let second = engine.schedule_pass();

        assert!(engine.run_scheduled(first).is_some());
        engine.stop();
        assert!(engine.run_scheduled(second).is_none());

        engine.play();
        assert!(engine.run_scheduled(second).is_none());
        assert_eq!(engine.step_passes(), 1);
    }

    #[test]
    fn reset_keeps_play_state() {
        let mut engine = engine();
        engine.play();
        engine.tick();
        engine.reset();
        assert!(engine.is_running());
        assert_eq!(engine.raster().rgba(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(engine.step_passes(), 0);
    }

    #[test]
    fn step_scalar_applies_to_next_pass() {
        let mut engine = engine();
        engine.set_step(10);
        engine.step_once();
        assert_eq!(engine.raster().rgba(1, 0), Some([11, 11, 11, 255]));
        engine.set_step(-11);
        engine.step_once();
        assert_eq!(engine.raster().rgba(1, 0), Some([0, 0, 0, 255]));
    }

    #[test]
    fn resize_reseeds_and_keeps_cursor_in_bounds() {
        let mut engine = engine();
        {
            let (cursor, width, height) = engine.cursor_mut();
            cursor.place(3, 2, width, height);
        }
        engine.resize(2, 2).expect("resize");
        assert!(engine.readout().is_none());
        assert_eq!(engine.raster().rgba(1, 1), Some([2, 2, 2, 255]));

        let (cursor, width, height) = engine.cursor_mut();
        cursor.place(1, 1, width, height);
        cursor.nudge(Direction::Left, width, height);
        assert_eq!(engine.readout().map(|r| (r.x, r.r)), Some((0, 1)));
    }

    #[test]
    fn layout_switch_resets_formulas() {
        let mut engine = engine();
        engine
            .set_formula(SlotId::start(crate::slots::Channel::Red), "x*y")
            .expect("valid");
        engine.set_layout(FormulaLayout::Indexed).expect("layout");
        assert_eq!(
            engine
                .formulas()
                .start(crate::slots::Channel::Red)
                .source(),
            "i"
        );
    }
}
