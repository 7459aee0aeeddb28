//! Thumbnail and crop geometry on decoded handles.
//!
//! These functions combine the pure math in
//! [`calculations`](super::calculations) with engine primitives. The
//! engine's own crop-aware thumbnail is used wherever it is safe; animated
//! images with a crop go through a pre-scale + extract path instead,
//! because the engine's crop does not respect frame boundaries.

use super::backend::{BackendError, ImageHandle};
use super::calculations::{anchor_offset, focal_origin, plan_thumbnail, prescale_box};
use super::guard::ResolutionLimits;
use super::params::{Crop, Size};

/// Result type for geometry operations.
pub type Result<T> = std::result::Result<T, BackendError>;

fn caps(limits: &ResolutionLimits) -> (u32, u32) {
    (limits.max_width, limits.max_height)
}

/// Refuse a resample whose scaled frames would break `limits`, before the
/// engine produces them.
pub fn check_resample<H: ImageHandle>(
    image: &H,
    width: u32,
    height: u32,
    crop: Crop,
    size: Size,
    limits: &ResolutionLimits,
) -> Result<()> {
    let source = (image.width(), image.page_height());
    let plan = plan_thumbnail(source, (width, height), crop != Crop::None, size);
    let (scaled_w, scaled_h) = plan.scaled;
    if limits.admits(scaled_w, scaled_h, image.frames()) {
        Ok(())
    } else {
        Err(BackendError::limit_exceeded(scaled_w, scaled_h, image.frames()))
    }
}

/// Resize `image` to `width`×`height` under the crop and size policies.
pub fn thumbnail<H: ImageHandle>(
    image: &mut H,
    width: u32,
    height: u32,
    crop: Crop,
    size: Size,
    limits: &ResolutionLimits,
) -> Result<()> {
    if crop == Crop::None || size == Size::Force || image.height() == image.page_height() {
        check_resample(image, width, height, crop, size, limits)?;
        return image.thumbnail_with_size(width, height, crop, size);
    }
    animated_thumbnail_with_crop(image, width, height, crop, size, limits)
}

/// Frame-aware thumbnail with crop: pre-scale without cropping so one edge
/// matches the target, then cut the same rectangle out of every frame.
pub fn animated_thumbnail_with_crop<H: ImageHandle>(
    image: &mut H,
    width: u32,
    height: u32,
    crop: Crop,
    size: Size,
    limits: &ResolutionLimits,
) -> Result<()> {
    if size == Size::Down && image.width() < width && image.page_height() < height {
        return Ok(());
    }

    let source = (image.width(), image.page_height());
    let (box_w, box_h) = prescale_box((width, height), source, caps(limits));
    check_resample(image, box_w, box_h, Crop::None, size, limits)?;
    image.thumbnail_with_size(box_w, box_h, Crop::None, size)?;

    let prescaled = (image.width(), image.page_height());
    let (left, top) = anchor_offset(prescaled, (width, height), crop);
    image.extract_area(
        left,
        top,
        width.min(prescaled.0),
        height.min(prescaled.1),
    )
}

/// Crop `width`×`height` around a fractional focal point (`fx`, `fy`).
pub fn focal_thumbnail<H: ImageHandle>(
    image: &mut H,
    width: u32,
    height: u32,
    fx: f64,
    fy: f64,
    limits: &ResolutionLimits,
) -> Result<()> {
    let source = (image.width(), image.page_height());
    let (box_w, box_h) = prescale_box((width, height), source, caps(limits));
    check_resample(image, box_w, box_h, Crop::None, Size::Both, limits)?;
    image.thumbnail(box_w, box_h, Crop::None)?;

    let prescaled = (image.width(), image.page_height());
    let (left, top) = focal_origin(prescaled, (width, height), (fx, fy));
    image.extract_area(
        left,
        top,
        width.min(prescaled.0),
        height.min(prescaled.1),
    )
}
