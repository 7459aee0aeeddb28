//! Imaging engine traits and shared types.
//!
//! The [`ImageEngine`] trait is the boundary to the native imaging engine:
//! decode, a process-wide startup/shutdown pair, and a decoded
//! [`ImageHandle`] exposing the geometric and encode primitives the rest of
//! the crate builds on. Everything above this module is engine-agnostic.
//!
//! The production implementation is
//! [`RustEngine`](super::rust_backend::RustEngine), built on the `image`
//! crate and statically linked into the binary.
//!
//! Engine errors are raw: a domain tag plus a message, displayed as
//! `"<domain>: <message>"`. They are classified exactly once, when they
//! cross into [`crate::Error`].

use super::params::{Crop, ImportParams, OutputFormat, Quality, Size};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{domain}: {message}")]
    Failed { domain: String, message: String },
    /// Geometry over the configured ceilings, caught before the pixels
    /// were produced.
    #[error("resolution limits exceeded: {0}")]
    LimitExceeded(String),
}

impl BackendError {
    pub fn limit_exceeded(width: u32, height: u32, frames: u32) -> Self {
        Self::LimitExceeded(format!("{width}x{height} x{frames} frames"))
    }

    pub fn failed(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            domain: domain.into(),
            message: message.into(),
        }
    }
}

/// Process-wide engine settings applied by [`ImageEngine::startup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_cache_files: u64,
    pub max_cache_mem: u64,
    pub max_cache_size: u64,
    /// Number of worker threads the engine may run native work on.
    pub concurrency: usize,
    /// Engine messages below this level are dropped.
    pub log_level: log::LevelFilter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cache_files: 0,
            max_cache_mem: 0,
            max_cache_size: 0,
            concurrency: 1,
            log_level: log::LevelFilter::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Angle {
    D90,
    D180,
    D270,
}

impl Angle {
    /// Map degrees to a right-angle rotation. Other angles are not supported.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            90 => Some(Self::D90),
            180 => Some(Self::D180),
            270 => Some(Self::D270),
            _ => None,
        }
    }
}

/// A decoded raster image, possibly multi-frame.
///
/// Frames are stacked vertically: `height() == page_height() * frames()`.
/// Geometric operations apply to every frame with frame-relative
/// coordinates. Native resources are released when the handle is dropped.
pub trait ImageHandle: Send + Sized {
    fn width(&self) -> u32;

    /// Total height across all frames.
    fn height(&self) -> u32;

    /// Height of a single frame.
    fn page_height(&self) -> u32;

    fn frames(&self) -> u32 {
        self.height() / self.page_height().max(1)
    }

    /// EXIF orientation of the source (1 = upright), before auto-rotation.
    fn orientation(&self) -> u8 {
        1
    }

    /// Resize into `width`×`height` under the given crop and size policies.
    fn thumbnail_with_size(
        &mut self,
        width: u32,
        height: u32,
        crop: Crop,
        size: Size,
    ) -> Result<(), BackendError>;

    fn thumbnail(&mut self, width: u32, height: u32, crop: Crop) -> Result<(), BackendError> {
        self.thumbnail_with_size(width, height, crop, Size::Both)
    }

    /// Keep only the `width`×`height` area at (`left`, `top`) of every frame.
    fn extract_area(
        &mut self,
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError>;

    fn flip(&mut self, direction: Direction) -> Result<(), BackendError>;

    fn rotate(&mut self, angle: Angle) -> Result<(), BackendError>;

    fn grayscale(&mut self) -> Result<(), BackendError>;

    fn blur(&mut self, sigma: f32) -> Result<(), BackendError>;

    fn sharpen(&mut self, sigma: f32) -> Result<(), BackendError>;

    /// Add `delta` to every colour channel, saturating.
    fn brighten(&mut self, delta: i32) -> Result<(), BackendError>;

    /// Stretch (positive) or flatten (negative) contrast around mid-grey.
    fn contrast(&mut self, amount: f32) -> Result<(), BackendError>;

    fn hue_rotate(&mut self, degrees: i32) -> Result<(), BackendError>;

    /// Draw the first frame of `overlay` onto every frame at (`left`, `top`).
    fn composite(&mut self, overlay: &Self, left: i64, top: i64) -> Result<(), BackendError>;

    fn encode(&self, format: OutputFormat, quality: Quality) -> Result<Vec<u8>, BackendError>;
}

/// The native imaging engine.
///
/// `startup`/`shutdown` are process-wide and not idempotent on their own;
/// callers go through [`EngineLifecycle`](crate::lifecycle::EngineLifecycle),
/// which counts.
pub trait ImageEngine: Send + Sync {
    type Image: ImageHandle;

    fn startup(&self, config: &EngineConfig) -> Result<(), BackendError>;

    fn shutdown(&self);

    fn load_image(&self, source: &[u8], params: &ImportParams)
    -> Result<Self::Image, BackendError>;

    /// Decode straight to a thumbnail, letting the decoder shrink on load
    /// where the format allows it.
    fn load_thumbnail(
        &self,
        source: &[u8],
        width: u32,
        height: u32,
        crop: Crop,
        size: Size,
        params: &ImportParams,
    ) -> Result<Self::Image, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::calculations::plan_thumbnail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Mock engine that records operations without touching pixels.
    /// Uses Mutex (not RefCell) so it is Sync and can back shared processors.
    #[derive(Default)]
    pub struct MockEngine {
        pub startups: AtomicUsize,
        pub shutdowns: AtomicUsize,
        pub last_config: Mutex<Option<EngineConfig>>,
        /// Dimensions handed out by the next loads: (width, page_height, frames).
        pub next_images: Mutex<Vec<(u32, u32, u32)>>,
        /// Error message returned by the next load instead of an image.
        pub load_error: Mutex<Option<(String, String)>>,
        pub operations: Arc<Mutex<Vec<RecordedOp>>>,
        pub released: Arc<AtomicUsize>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        LoadImage {
            fail_on_error: bool,
            max_frames: Option<u32>,
        },
        LoadThumbnail {
            width: u32,
            height: u32,
            crop: Crop,
            size: Size,
        },
        Thumbnail {
            width: u32,
            height: u32,
            crop: Crop,
            size: Size,
        },
        ExtractArea {
            left: u32,
            top: u32,
            width: u32,
            height: u32,
        },
        Flip(Direction),
        Rotate(Angle),
        Grayscale,
        Blur(f32),
        Sharpen(f32),
        Brighten(i32),
        Contrast(f32),
        HueRotate(i32),
        Composite {
            left: i64,
            top: i64,
        },
        Encode(OutputFormat, u32),
    }

    impl MockEngine {
        pub fn new() -> Self {
            Self::default()
        }

        /// Images are handed out in the given order.
        pub fn with_images(mut images: Vec<(u32, u32, u32)>) -> Self {
            images.reverse();
            Self {
                next_images: Mutex::new(images),
                ..Self::default()
            }
        }

        pub fn fail_next_load(&self, domain: &str, message: &str) {
            *self.load_error.lock().unwrap() = Some((domain.to_string(), message.to_string()));
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }

        fn next_image(&self) -> Result<MockImage, BackendError> {
            if let Some((domain, message)) = self.load_error.lock().unwrap().take() {
                return Err(BackendError::failed(domain, message));
            }
            let (width, page_height, frames) = self
                .next_images
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| BackendError::failed("MockLoad", "no mock image queued"))?;
            Ok(MockImage::new(
                width,
                page_height,
                frames,
                Arc::clone(&self.operations),
                Arc::clone(&self.released),
            ))
        }
    }

    impl ImageEngine for MockEngine {
        type Image = MockImage;

        fn startup(&self, config: &EngineConfig) -> Result<(), BackendError> {
            self.startups.fetch_add(1, Ordering::SeqCst);
            *self.last_config.lock().unwrap() = Some(config.clone());
            Ok(())
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        fn load_image(
            &self,
            _source: &[u8],
            params: &ImportParams,
        ) -> Result<MockImage, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::LoadImage {
                fail_on_error: params.fail_on_error,
                max_frames: params.max_frames,
            });
            self.next_image()
        }

        fn load_thumbnail(
            &self,
            _source: &[u8],
            width: u32,
            height: u32,
            crop: Crop,
            size: Size,
            _params: &ImportParams,
        ) -> Result<MockImage, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::LoadThumbnail {
                width,
                height,
                crop,
                size,
            });
            let mut image = self.next_image()?;
            image.apply_plan(width, height, crop, size);
            Ok(image)
        }
    }

    /// Dimension-only image. Counts its own release.
    pub struct MockImage {
        pub width: u32,
        pub page_height: u32,
        pub frames: u32,
        operations: Arc<Mutex<Vec<RecordedOp>>>,
        released: Arc<AtomicUsize>,
    }

    impl MockImage {
        pub fn new(
            width: u32,
            page_height: u32,
            frames: u32,
            operations: Arc<Mutex<Vec<RecordedOp>>>,
            released: Arc<AtomicUsize>,
        ) -> Self {
            Self {
                width,
                page_height,
                frames,
                operations,
                released,
            }
        }

        /// A standalone image whose operations and releases go nowhere.
        pub fn detached(width: u32, page_height: u32, frames: u32) -> Self {
            Self::new(
                width,
                page_height,
                frames,
                Arc::default(),
                Arc::default(),
            )
        }

        pub fn operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn record(&self, op: RecordedOp) {
            self.operations.lock().unwrap().push(op);
        }

        fn apply_plan(&mut self, width: u32, height: u32, crop: Crop, size: Size) {
            let plan = plan_thumbnail(
                (self.width, self.page_height),
                (width, height),
                crop != Crop::None,
                size,
            );
            let (w, h) = plan.output();
            self.width = w;
            self.page_height = h;
        }
    }

    impl Drop for MockImage {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ImageHandle for MockImage {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.page_height * self.frames
        }

        fn page_height(&self) -> u32 {
            self.page_height
        }

        fn thumbnail_with_size(
            &mut self,
            width: u32,
            height: u32,
            crop: Crop,
            size: Size,
        ) -> Result<(), BackendError> {
            self.record(RecordedOp::Thumbnail {
                width,
                height,
                crop,
                size,
            });
            self.apply_plan(width, height, crop, size);
            Ok(())
        }

        fn extract_area(
            &mut self,
            left: u32,
            top: u32,
            width: u32,
            height: u32,
        ) -> Result<(), BackendError> {
            self.record(RecordedOp::ExtractArea {
                left,
                top,
                width,
                height,
            });
            if left + width > self.width || top + height > self.page_height {
                return Err(BackendError::failed("extract_area", "bad extract area"));
            }
            self.width = width;
            self.page_height = height;
            Ok(())
        }

        fn flip(&mut self, direction: Direction) -> Result<(), BackendError> {
            self.record(RecordedOp::Flip(direction));
            Ok(())
        }

        fn rotate(&mut self, angle: Angle) -> Result<(), BackendError> {
            self.record(RecordedOp::Rotate(angle));
            if angle != Angle::D180 {
                std::mem::swap(&mut self.width, &mut self.page_height);
            }
            Ok(())
        }

        fn grayscale(&mut self) -> Result<(), BackendError> {
            self.record(RecordedOp::Grayscale);
            Ok(())
        }

        fn blur(&mut self, sigma: f32) -> Result<(), BackendError> {
            self.record(RecordedOp::Blur(sigma));
            Ok(())
        }

        fn sharpen(&mut self, sigma: f32) -> Result<(), BackendError> {
            self.record(RecordedOp::Sharpen(sigma));
            Ok(())
        }

        fn brighten(&mut self, delta: i32) -> Result<(), BackendError> {
            self.record(RecordedOp::Brighten(delta));
            Ok(())
        }

        fn contrast(&mut self, amount: f32) -> Result<(), BackendError> {
            self.record(RecordedOp::Contrast(amount));
            Ok(())
        }

        fn hue_rotate(&mut self, degrees: i32) -> Result<(), BackendError> {
            self.record(RecordedOp::HueRotate(degrees));
            Ok(())
        }

        fn composite(&mut self, _overlay: &Self, left: i64, top: i64) -> Result<(), BackendError> {
            self.record(RecordedOp::Composite { left, top });
            Ok(())
        }

        fn encode(&self, format: OutputFormat, quality: Quality) -> Result<Vec<u8>, BackendError> {
            self.record(RecordedOp::Encode(format, quality.value()));
            Ok(format!("{}x{}x{}", self.width, self.page_height, self.frames).into_bytes())
        }
    }

    #[test]
    fn mock_records_load_and_counts_release() {
        let engine = MockEngine::with_images(vec![(800, 600, 1)]);

        let image = engine.load_image(b"", &ImportParams::tolerant()).unwrap();
        assert_eq!(image.width(), 800);
        assert_eq!(image.height(), 600);
        assert_eq!(engine.released(), 0);
        drop(image);
        assert_eq!(engine.released(), 1);

        let ops = engine.get_operations();
        assert_eq!(
            ops,
            vec![RecordedOp::LoadImage {
                fail_on_error: false,
                max_frames: None
            }]
        );
    }

    #[test]
    fn mock_load_error_is_returned_once() {
        let engine = MockEngine::with_images(vec![(10, 10, 1)]);
        engine.fail_next_load("ForeignLoad", "buffer is not in a known format");

        let err = engine.load_image(b"", &ImportParams::tolerant()).err().unwrap();
        assert_eq!(err.to_string(), "ForeignLoad: buffer is not in a known format");
        assert!(engine.load_image(b"", &ImportParams::tolerant()).is_ok());
    }

    #[test]
    fn mock_frames_derive_from_height() {
        let image = MockImage::detached(100, 50, 4);
        assert_eq!(image.height(), 200);
        assert_eq!(image.frames(), 4);
    }

    #[test]
    fn angle_from_degrees_normalizes() {
        assert_eq!(Angle::from_degrees(-90), Some(Angle::D270));
        assert_eq!(Angle::from_degrees(450), Some(Angle::D90));
        assert_eq!(Angle::from_degrees(45), None);
        assert_eq!(Angle::from_degrees(0), None);
    }
}
