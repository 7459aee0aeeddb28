//! Pure calculation functions for thumbnail and crop geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//! Ratios are compared in `f64`; focal offsets are computed and clamped in
//! `f64` and truncated to whole pixels once, at the end.

use super::params::{Crop, Size};

/// Outcome of planning a thumbnail: the size to resample to, and the
/// crop box to cut out of it afterwards (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailPlan {
    pub scaled: (u32, u32),
    pub crop: Option<(u32, u32)>,
}

impl ThumbnailPlan {
    /// Final dimensions after scaling and cropping.
    pub fn output(&self) -> (u32, u32) {
        self.crop.unwrap_or(self.scaled)
    }
}

/// Plan a thumbnail of a `source` frame into a `target` box.
///
/// - Without crop the image is scaled to fit inside the box; one edge
///   matches exactly, the other may fall short.
/// - With crop the image is scaled to cover the box; one edge matches
///   exactly, the other overflows and is cropped back to the box.
/// - [`Size::Down`] never enlarges.
/// - [`Size::Force`] resamples to exactly `target`, ignoring aspect ratio.
///
/// # Examples
/// ```
/// # use imgrelay::imaging::calculations::plan_thumbnail;
/// # use imgrelay::imaging::Size;
/// // 800x600 fit into 400x400 → 400x300
/// let plan = plan_thumbnail((800, 600), (400, 400), false, Size::Both);
/// assert_eq!(plan.output(), (400, 300));
/// ```
pub fn plan_thumbnail(
    source: (u32, u32),
    target: (u32, u32),
    crop: bool,
    size: Size,
) -> ThumbnailPlan {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    if size == Size::Force {
        return ThumbnailPlan {
            scaled: (tgt_w.max(1), tgt_h.max(1)),
            crop: None,
        };
    }
    if src_w == 0 || src_h == 0 || tgt_w == 0 || tgt_h == 0 {
        return ThumbnailPlan {
            scaled: source,
            crop: None,
        };
    }

    let scale_x = tgt_w as f64 / src_w as f64;
    let scale_y = tgt_h as f64 / src_h as f64;
    // Fit is bound by the smaller factor, cover by the larger one
    let width_bound = if crop {
        scale_x >= scale_y
    } else {
        scale_x <= scale_y
    };
    let factor = if width_bound { scale_x } else { scale_y };

    let scaled = if size == Size::Down && factor >= 1.0 {
        source
    } else if width_bound {
        (tgt_w, ((src_h as f64 * factor).round() as u32).max(1))
    } else {
        (((src_w as f64 * factor).round() as u32).max(1), tgt_h)
    };

    let crop_box = crop
        .then(|| (tgt_w.min(scaled.0), tgt_h.min(scaled.1)))
        .filter(|&b| b != scaled);

    ThumbnailPlan {
        scaled,
        crop: crop_box,
    }
}

/// Whether the target box is wider (in aspect) than a source frame.
pub fn target_is_wider(target: (u32, u32), source: (u32, u32)) -> bool {
    let (tgt_w, tgt_h) = target;
    let (src_w, src_h) = source;
    tgt_w as f64 / tgt_h as f64 > src_w as f64 / src_h as f64
}

/// Box to pre-scale a source frame into before cropping to `target`.
///
/// A wider target pins the width and lets the height run up to
/// `max.1`; otherwise the height is pinned and the width runs up to `max.0`.
pub fn prescale_box(target: (u32, u32), source: (u32, u32), max: (u32, u32)) -> (u32, u32) {
    if target_is_wider(target, source) {
        (target.0, max.1)
    } else {
        (max.0, target.1)
    }
}

/// Top-left offset of a `target` crop inside a `prescaled` frame.
///
/// High anchors bottom-right, Centre and Attention anchor to the centre,
/// anything else anchors to the origin.
pub fn anchor_offset(prescaled: (u32, u32), target: (u32, u32), crop: Crop) -> (u32, u32) {
    let spare_x = prescaled.0.saturating_sub(target.0);
    let spare_y = prescaled.1.saturating_sub(target.1);
    match crop {
        Crop::High => (spare_x, spare_y),
        Crop::Centre | Crop::Attention => (spare_x / 2, spare_y / 2),
        Crop::None => (0, 0),
    }
}

/// Top-left origin of a `target` crop centred on a fractional focal point,
/// clamped so the rectangle stays inside the `prescaled` frame.
///
/// # Examples
/// ```
/// # use imgrelay::imaging::calculations::focal_origin;
/// assert_eq!(focal_origin((1000, 1000), (200, 200), (0.5, 0.5)), (400, 400));
/// assert_eq!(focal_origin((1000, 1000), (200, 200), (1.0, 1.0)), (800, 800));
/// ```
pub fn focal_origin(prescaled: (u32, u32), target: (u32, u32), focal: (f64, f64)) -> (u32, u32) {
    let (pw, ph) = (prescaled.0 as f64, prescaled.1 as f64);
    let (tw, th) = (target.0 as f64, target.1 as f64);

    let left = pw * focal.0 - tw / 2.0;
    let top = ph * focal.1 - th / 2.0;

    let left = left.min(pw - tw).max(0.0);
    let top = top.min(ph - th).max(0.0);

    (left as u32, top as u32)
}
