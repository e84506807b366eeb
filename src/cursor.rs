use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::raster::{read_pixel, Raster};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CursorPos {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Pointer position in CSS pixels plus the canvas's top-left corner in the
/// same space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub client_x: f64,
    pub client_y: f64,
    pub canvas_left: f64,
    pub canvas_top: f64,
}

/// The inspected pixel. Absent until the user places it; `(0, 0)` is an
/// ordinary position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    position: Option<CursorPos>,
}

impl Cursor {
    pub fn position(&self) -> Option<CursorPos> {
        self.position
    }

    pub fn is_placed(&self) -> bool {
        self.position.is_some()
    }

    /// Move to `(x, y)`. Out-of-bounds targets are ignored and return false.
    pub fn place(&mut self, x: i64, y: i64, width: u32, height: u32) -> bool {
        let in_bounds = x >= 0 && y >= 0 && x < i64::from(width) && y < i64::from(height);
        if !in_bounds {
            return false;
        }
        self.position = Some(CursorPos {
            x: x as u32,
            y: y as u32,
        });
        true
    }

    /// Place from a pointer event, scaling CSS pixels by the device pixel
    /// ratio into buffer pixels.
    pub fn place_from_pointer(
        &mut self,
        event: PointerEvent,
        device_pixel_ratio: f64,
        width: u32,
        height: u32,
    ) -> bool {
        if !device_pixel_ratio.is_finite() || device_pixel_ratio <= 0.0 {
            return false;
        }
        let x = ((event.client_x - event.canvas_left) * device_pixel_ratio).floor();
        let y = ((event.client_y - event.canvas_top) * device_pixel_ratio).floor();
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        self.place(x as i64, y as i64, width, height)
    }

    /// Arrow-key nudge by one pixel. Does nothing without a placed cursor or
    /// at the canvas edge.
    pub fn nudge(&mut self, direction: Direction, width: u32, height: u32) -> bool {
        let Some(CursorPos { x, y }) = self.position else {
            return false;
        };
        let (x, y) = (i64::from(x), i64::from(y));
        let (x, y) = match direction {
            Direction::Up => (x, y - 1),
            Direction::Down => (x, y + 1),
            Direction::Left => (x - 1, y),
            Direction::Right => (x + 1, y),
        };
        self.place(x, y, width, height)
    }

    pub fn clear(&mut self) {
        self.position = None;
    }

    /// Drop the cursor if a resize left it outside the canvas.
    pub fn retain_within(&mut self, width: u32, height: u32) {
        if let Some(CursorPos { x, y }) = self.position {
            if x >= width || y >= height {
                self.position = None;
            }
        }
    }

    pub fn readout(&self, raster: &Raster) -> Option<PixelReadout> {
        let CursorPos { x, y } = self.position?;
        let [r, g, b] = read_pixel(raster, x, y)?;
        Some(PixelReadout { x, y, r, g, b })
    }
}

/// Snapshot of one pixel, taken between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelReadout {
    pub x: u32,
    pub y: u32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PixelReadout {
    /// `#rrggbb`
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Display for PixelReadout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x: {:04} y: {:04} r: {:03} g: {:03} b: {:03}",
            self.x, self.y, self.r, self.g, self.b
        )
    }
}
