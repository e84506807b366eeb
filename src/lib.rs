pub mod channel;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error_codes;
pub mod export;
pub mod formula;
pub mod pass;
pub mod raster;
pub mod schedule;
pub mod slots;

pub use channel::clamp_channel;
pub use formula::{compile, CompileError, Formula};
pub use pass::{seed, step};
pub use raster::{read_pixel, Raster};
