//! Resolution guard against decompression bombs.
//!
//! Decoders consult [`ResolutionLimits::admits`] with header geometry
//! before allocating. Every decoded handle then passes through
//! [`ResolutionLimits::check`] before any further work is done with it, and
//! again after operations that can grow it. A rejected handle is dropped on
//! the spot, releasing its native memory before the error propagates.

use super::backend::ImageHandle;
use crate::error::Error;

/// Dimension and pixel-count ceilings for decoded images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionLimits {
    pub max_width: u32,
    /// Compared against the frame height, not the full animation strip.
    pub max_height: u32,
    /// Compared against width × full height, so animations pay per frame.
    pub max_resolution: u64,
}

impl Default for ResolutionLimits {
    fn default() -> Self {
        Self {
            max_width: 9999,
            max_height: 9999,
            max_resolution: 81_000_000,
        }
    }
}

impl ResolutionLimits {
    /// Pass-through on error; otherwise reject images over the limits.
    pub fn check<H: ImageHandle>(&self, image: Result<H, Error>) -> Result<H, Error> {
        let image = image?;
        if self.exceeded_by(&image) {
            log::warn!(
                "rejecting {}x{} image ({} frames): resolution limits exceeded",
                image.width(),
                image.page_height(),
                image.frames()
            );
            drop(image);
            return Err(Error::MaxResolutionExceeded);
        }
        Ok(image)
    }

    pub fn exceeded_by<H: ImageHandle>(&self, image: &H) -> bool {
        !self.admits(image.width(), image.page_height(), image.frames())
    }

    /// Whether `frames` frames of `width`×`page_height` fit the limits.
    ///
    /// Needs only geometry, so decoders can ask before allocating pixels.
    pub fn admits(&self, width: u32, page_height: u32, frames: u32) -> bool {
        let pixels = u64::from(width)
            .saturating_mul(u64::from(page_height))
            .saturating_mul(u64::from(frames.max(1)));
        width <= self.max_width && page_height <= self.max_height && pixels <= self.max_resolution
    }
}
