//! Seed and step passes over a [`Raster`].
//!
//! Pixels never depend on each other within a pass, so rows are processed in
//! parallel. Both passes take `&mut Raster`, so nothing can observe a
//! half-written frame.

use std::time::{Duration, Instant};

use log::{debug, warn};
use rayon::prelude::*;

use crate::channel::try_clamp_channel;
use crate::raster::{Raster, BYTES_PER_PIXEL};
use crate::slots::{Channel, FormulaLayout, FormulaSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Seed,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub kind: PassKind,
    pub pixels: usize,
    /// Channel evaluations that produced a non-finite value and fell back to 0.
    pub faults: usize,
    pub elapsed: Duration,
}

/// Where a pixel sits, in every form a formula may ask for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelContext {
    pub x: f64,
    pub y: f64,
    /// Flat byte index of the pixel's red channel.
    pub index: f64,
}

/// Overwrite every pixel from the start formulas. Alpha becomes 255.
pub fn seed(raster: &mut Raster, formulas: &FormulaSet) -> PassReport {
    let started = Instant::now();
    let width = raster.width() as usize;
    let stride = raster.stride();
    let pixels = raster.pixel_count();

    let faults = raster
        .as_bytes_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .map(|(y, row)| {
            let mut faults = 0;
            for (x, px) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                let context = pixel_context(x, y, width);
                let (color, pixel_faults) = start_color(formulas, context);
                px[..3].copy_from_slice(&color);
                px[3] = 255;
                faults += pixel_faults;
            }
            faults
        })
        .sum::<usize>();

    finish(PassKind::Seed, pixels, faults, started)
}

/// Advance every pixel one step with the change formulas. Alpha is untouched.
pub fn step(raster: &mut Raster, formulas: &FormulaSet, step: i64) -> PassReport {
    let started = Instant::now();
    let width = raster.width() as usize;
    let stride = raster.stride();
    let pixels = raster.pixel_count();
    let step = step as f64;

    let faults = raster
        .as_bytes_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .map(|(y, row)| {
            let mut faults = 0;
            for (x, px) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
                let context = pixel_context(x, y, width);
                let current = [px[0], px[1], px[2]];
                let (color, pixel_faults) = next_color(formulas, current, step, context);
                px[..3].copy_from_slice(&color);
                faults += pixel_faults;
            }
            faults
        })
        .sum::<usize>();

    finish(PassKind::Step, pixels, faults, started)
}

/// Seed colour for one pixel and the number of faulted channels.
pub fn start_color(formulas: &FormulaSet, context: PixelContext) -> ([u8; 3], usize) {
    let mut color = [0u8; 3];
    let mut faults = 0;
    for channel in Channel::ALL {
        let formula = formulas.start(channel);
        let raw = match formulas.layout() {
            FormulaLayout::Full | FormulaLayout::Positional => {
                formula.evaluate(&[context.x, context.y])
            }
            FormulaLayout::Indexed => formula.evaluate(&[context.index]),
        };
        match try_clamp_channel(raw) {
            Some(value) => color[channel.index()] = value,
            None => faults += 1,
        }
    }
    (color, faults)
}

/// Next colour for one pixel. Every channel is computed from `current`, never
/// from a channel already updated in this pass.
pub fn next_color(
    formulas: &FormulaSet,
    current: [u8; 3],
    step: f64,
    context: PixelContext,
) -> ([u8; 3], usize) {
    let mut color = [0u8; 3];
    let mut faults = 0;
    for channel in Channel::ALL {
        match next_channel(formulas, channel, current, step, context) {
            Some(value) => color[channel.index()] = value,
            None => faults += 1,
        }
    }
    (color, faults)
}

/// One channel's next value, `None` when the formula produced a non-finite
/// result.
#[inline]
pub fn next_channel(
    formulas: &FormulaSet,
    channel: Channel,
    current: [u8; 3],
    step: f64,
    context: PixelContext,
) -> Option<u8> {
    let formula = formulas.change(channel);
    let own = f64::from(current[channel.index()]);
    let raw = match formulas.layout() {
        FormulaLayout::Full => formula.evaluate(&[
            f64::from(current[0]),
            f64::from(current[1]),
            f64::from(current[2]),
            step,
            context.x,
            context.y,
        ]),
        FormulaLayout::Positional => formula.evaluate(&[context.x, context.y, own, step]),
        FormulaLayout::Indexed => formula.evaluate(&[own, step, context.index]),
    };
    try_clamp_channel(raw)
}

#[inline]
fn pixel_context(x: usize, y: usize, width: usize) -> PixelContext {
    PixelContext {
        x: x as f64,
        y: y as f64,
        index: ((x + y * width) * BYTES_PER_PIXEL) as f64,
    }
}

fn finish(kind: PassKind, pixels: usize, faults: usize, started: Instant) -> PassReport {
    let report = PassReport {
        kind,
        pixels,
        faults,
        elapsed: started.elapsed(),
    };
    if faults > 0 {
        warn!(
            "{kind:?} pass: {faults} channel evaluation(s) were not finite and fell back to 0"
        );
    }
    debug!(
        "{kind:?} pass over {pixels} pixels took {:.2}ms",
        report.elapsed.as_secs_f64() * 1000.0
    );
    report
}
