//! Rendering of preview frames: style cascade, layout, paint and raster.

pub mod font;
pub mod frame;
pub mod layout;
pub mod paint;
pub mod raster;
pub mod style;

pub use frame::{Frame, StyleRoot, FRAME_ROOT_ID};

/// Bitmap produced by one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub width: u32,
    pub height: u32,
    /// PNG-encoded pixels
    pub png: Vec<u8>,
}

impl CaptureResult {
    pub fn byte_len(&self) -> usize {
        self.png.len()
    }
}
