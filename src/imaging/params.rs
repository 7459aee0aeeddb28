//! Parameter types for engine operations.
//!
//! These types describe *what* the engine should do, not *how*. They are the
//! interface between the geometry code in [`operations`](super::operations)
//! (which decides how to scale and where to crop) and the
//! [`backend`](super::backend) (which does the pixel work). This separation
//! allows swapping engines (e.g. for testing with a mock) without changing
//! the geometry logic.
//!
//! ## Types
//!
//! - [`Crop`]: where a crop rectangle is anchored inside a pre-scaled image.
//! - [`Size`]: whether aspect ratio and downsize-only constraints apply.
//! - [`OutputFormat`]: encodable output formats.
//! - [`Quality`]: lossy encoding quality (1–100, default 80). Clamped on construction.
//! - [`ImportParams`]: decode options passed to every load call.

use super::guard::ResolutionLimits;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Crop anchor policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crop {
    /// No crop: scale to fit inside the target box.
    #[default]
    None,
    Centre,
    /// Region with the most detail.
    Attention,
    /// Brightest region for single-frame images; bottom-right for animations.
    High,
}

impl FromStr for Crop {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "centre" | "center" => Ok(Self::Centre),
            "attention" | "smart" => Ok(Self::Attention),
            "high" => Ok(Self::High),
            other => Err(format!(
                "unknown crop policy '{other}' (expected none, centre, attention, high)"
            )),
        }
    }
}

/// Size policy for thumbnailing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Size {
    /// Scale up or down as needed.
    #[default]
    Both,
    /// Only ever shrink.
    Down,
    /// Exact target dimensions, aspect ratio and crop policy ignored.
    Force,
}

impl FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Self::Both),
            "down" => Ok(Self::Down),
            "force" => Ok(Self::Force),
            other => Err(format!(
                "unknown size policy '{other}' (expected both, down, force)"
            )),
        }
    }
}

/// Formats the engine can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Avif,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "gif" => Ok(Self::Gif),
            "webp" => Ok(Self::Webp),
            "avif" => Ok(Self::Avif),
            other => Err(format!("unsupported output format '{other}'")),
        }
    }
}

/// Quality setting for lossy image encoding (1-100).
///
/// The field is private: [`Quality::new`] is the only way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// Decode options for [`ImageEngine::load_image`](super::ImageEngine::load_image)
/// and [`ImageEngine::load_thumbnail`](super::ImageEngine::load_thumbnail).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportParams {
    /// Abort when a frame of an animation fails to decode instead of
    /// keeping the frames before it.
    ///
    /// Only animations can be cut short: a still image has a single frame,
    /// so a corrupt still fails either way.
    pub fail_on_error: bool,
    /// Maximum number of frames to decode. `None` decodes them all.
    pub max_frames: Option<u32>,
    /// Geometry ceilings the decoder enforces from the header, before any
    /// pixels are allocated. `None` leaves only the decoder's own defaults.
    pub limits: Option<ResolutionLimits>,
}

impl Default for ImportParams {
    fn default() -> Self {
        Self {
            fail_on_error: true,
            max_frames: None,
            limits: None,
        }
    }
}

impl ImportParams {
    /// Tolerant decoding: a broken animation frame never aborts a request.
    pub fn tolerant() -> Self {
        Self {
            fail_on_error: false,
            ..Self::default()
        }
    }

    pub fn with_max_frames(mut self, max_frames: Option<u32>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_limits(mut self, limits: ResolutionLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}
