//! Owned RGBA8 canvas addressed by flat byte index `(x + y * width) * 4`.

use std::error::Error;
use std::fmt::{Display, Formatter};

use sha2::{Digest, Sha256};

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterError {
    EmptyDimensions { width: u32, height: u32 },
    DimensionsOverflow,
}

impl Display for RasterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDimensions { width, height } => {
                write!(f, "canvas must be at least 1x1, got {width}x{height}")
            }
            Self::DimensionsOverflow => write!(f, "canvas dimensions overflowed usize"),
        }
    }
}

impl Error for RasterError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Raster {
    /// A zeroed (transparent black) canvas. Run a seed pass before showing it.
    pub fn new(width: u32, height: u32) -> Result<Self, RasterError> {
        let len = buffer_len(width, height)?;
        Ok(Self {
            width,
            height,
            pixels: vec![0; len],
        })
    }

    /// Reallocate for new dimensions. Contents are discarded.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RasterError> {
        let len = buffer_len(width, height)?;
        self.width = width;
        self.height = height;
        self.pixels = vec![0; len];
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len() / BYTES_PER_PIXEL
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Flat byte index of the pixel at `(x, y)`.
    pub fn index_of(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((x as usize + y as usize * self.width as usize) * BYTES_PER_PIXEL)
    }

    pub fn rgba(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let index = self.index_of(x, y)?;
        let px = self.pixels.get(index..index + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Owned copy of the current frame for sinks that outlive the borrow.
    pub fn to_frame(&self) -> Vec<u8> {
        self.pixels.clone()
    }

    /// SHA-256 of the buffer as lowercase hex.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(&self.pixels);
        hash.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

/// The `(r, g, b)` at `(x, y)`, or `None` outside the canvas.
pub fn read_pixel(raster: &Raster, x: u32, y: u32) -> Option<[u8; 3]> {
    raster.rgba(x, y).map(|[r, g, b, _]| [r, g, b])
}

fn buffer_len(width: u32, height: u32) -> Result<usize, RasterError> {
    if width == 0 || height == 0 {
        return Err(RasterError::EmptyDimensions { width, height });
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
        .ok_or(RasterError::DimensionsOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_canvas() {
        assert_eq!(
            Raster::new(0, 10),
            Err(RasterError::EmptyDimensions {
                width: 0,
                height: 10
            })
        );
    }

    #[test]
    fn flat_index_is_row_major() {
        let raster = Raster::new(5, 3).expect("raster");
        assert_eq!(raster.index_of(0, 0), Some(0));
        assert_eq!(raster.index_of(4, 0), Some(16));
        assert_eq!(raster.index_of(0, 1), Some(20));
        assert_eq!(raster.index_of(2, 2), Some((2 + 2 * 5) * 4));
        assert_eq!(raster.index_of(5, 0), None);
        assert_eq!(raster.index_of(0, 3), None);
    }

    #[test]
    fn read_pixel_is_bounds_checked() {
        let mut raster = Raster::new(2, 2).expect("raster");
        raster.as_bytes_mut()[12..16].copy_from_slice(&[7, 8, 9, 255]);
        assert_eq!(read_pixel(&raster, 1, 1), Some([7, 8, 9]));
        assert_eq!(read_pixel(&raster, 2, 1), None);
    }

    #[test]
    fn resize_discards_contents() {
        let mut raster = Raster::new(2, 2).expect("raster");
        raster.as_bytes_mut().fill(9);
        raster.resize(3, 1).expect("resize");
        assert_eq!(raster.as_bytes(), &[0; 12]);
        assert_eq!(raster.stride(), 12);
    }

    #[test]
    fn digest_tracks_content() {
        let mut raster = Raster::new(2, 1).expect("raster");
        let before = raster.digest();
        assert_eq!(before.len(), 64);
        raster.as_bytes_mut()[0] = 1;
        assert_ne!(before, raster.digest());
    }
}
