//! Pure Rust imaging engine.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Decode animations (GIF, WebP) | `image::AnimationDecoder`, frames stacked vertically |
//! | EXIF orientation | `ImageDecoder::orientation` + `DynamicImage::apply_orientation` |
//! | Resize | `image::imageops::resize` with `Lanczos3` filter |
//! | Attention / high crop | column and row profiles of edge energy / luminance |
//! | Blur / sharpen | `image::imageops::blur` / `unsharpen` |
//! | Brightness / contrast / hue | `image::imageops::brighten` / `contrast` / `huerotate` |
//! | Encode → JPEG, PNG, GIF, WebP (lossless) | `image::codecs::*` |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Per-frame parallelism | `rayon` pool sized by [`EngineConfig::concurrency`] |
//!
//! AVIF is encode-only: the `image` crate's `"avif"` feature only enables the
//! encoder, so AVIF input is reported as an unknown format.
//!
//! There is no shrink-on-load in the pure Rust JPEG decoder;
//! [`ImageEngine::load_thumbnail`] decodes fully and then thumbnails.
//!
//! ## Limits
//!
//! When [`ImportParams::limits`] is set, geometry is judged from the header
//! before any pixel buffer is allocated, the same ceilings are handed to the
//! decoder through [`image::Limits`], and animations are re-checked before
//! each further frame is pulled.

use super::backend::{Angle, BackendError, Direction, EngineConfig, ImageEngine, ImageHandle};
use super::calculations::{anchor_offset, plan_thumbnail};
use super::guard::ResolutionLimits;
use super::operations;
use super::params::{Crop, ImportParams, OutputFormat, Quality, Size};
use crate::lifecycle::EngineLifecycle;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::webp::WebPDecoder;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{
    AnimationDecoder, Delay, DynamicImage, Frame, ImageDecoder, ImageError, ImageFormat,
    ImageReader, Limits, Rgba, RgbaImage,
};
use rayon::prelude::*;
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

const LOG_TARGET: &str = "imgrelay::engine";

/// Frame delay used when an animation frame carries none.
const DEFAULT_DELAY_MS: u32 = 100;

/// Widest decoded sample: 16-bit RGBA.
const MAX_BYTES_PER_PIXEL: u64 = 8;

static SHARED: LazyLock<Arc<EngineLifecycle<RustEngine>>> =
    LazyLock::new(|| Arc::new(EngineLifecycle::new(RustEngine::new())));

fn unknown_format() -> BackendError {
    BackendError::failed("ForeignLoad", "buffer is not in a known format")
}

fn load_error(err: ImageError) -> BackendError {
    match err {
        ImageError::Unsupported(_) => unknown_format(),
        ImageError::Limits(e) => BackendError::LimitExceeded(e.to_string()),
        other => BackendError::failed("ForeignLoad", other.to_string()),
    }
}

fn save_error(err: ImageError) -> BackendError {
    BackendError::failed("ForeignSave", err.to_string())
}

/// Pure Rust engine using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustEngine {
    pool: RwLock<Option<Arc<rayon::ThreadPool>>>,
    log_level: RwLock<log::LevelFilter>,
}

impl RustEngine {
    pub fn new() -> Self {
        Self {
            pool: RwLock::new(None),
            log_level: RwLock::new(log::LevelFilter::Error),
        }
    }

    /// The process-wide engine, shared by every processor built on it.
    pub fn shared_lifecycle() -> Arc<EngineLifecycle<RustEngine>> {
        Arc::clone(&SHARED)
    }

    pub fn is_started(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn pool(&self) -> Result<Arc<rayon::ThreadPool>, BackendError> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BackendError::failed("RustEngine", "engine is not started"))
    }

    fn engine_log(&self, level: log::Level, args: fmt::Arguments<'_>) {
        if level <= *self.log_level.read().unwrap_or_else(PoisonError::into_inner) {
            log::log!(target: LOG_TARGET, level, "{args}");
        }
    }

    fn decode(&self, source: &[u8], params: &ImportParams) -> Result<Decoded, BackendError> {
        let format = image::guess_format(source).map_err(|_| unknown_format())?;
        match format {
            ImageFormat::Gif => {
                let mut decoder = GifDecoder::new(Cursor::new(source)).map_err(load_error)?;
                admit(&mut decoder, params, Orientation::NoTransforms)?;
                let screen = decoder.dimensions();
                self.decode_frames(decoder, screen, params)
            }
            ImageFormat::WebP => {
                let mut decoder = WebPDecoder::new(Cursor::new(source)).map_err(load_error)?;
                if decoder.has_animation() {
                    admit(&mut decoder, params, Orientation::NoTransforms)?;
                    let canvas = decoder.dimensions();
                    self.decode_frames(decoder, canvas, params)
                } else {
                    decode_still(source, format, params)
                }
            }
            _ => decode_still(source, format, params),
        }
    }

    /// Decode up to `max_frames` frames of a `width`×`height` canvas.
    fn decode_frames<'a>(
        &self,
        decoder: impl AnimationDecoder<'a>,
        (width, height): (u32, u32),
        params: &ImportParams,
    ) -> Result<Decoded, BackendError> {
        let limit = params.max_frames.map_or(usize::MAX, |n| n.max(1) as usize);
        let mut frames = Vec::new();
        let mut delays = Vec::new();

        for frame in decoder.into_frames().take(limit) {
            match frame {
                Ok(frame) => {
                    // Frames are full canvases; stop as soon as the strip outgrows the budget
                    if let Some(limits) = &params.limits {
                        let count = u32::try_from(frames.len() + 1).unwrap_or(u32::MAX);
                        if !limits.admits(width, height, count) {
                            return Err(BackendError::limit_exceeded(width, height, count));
                        }
                    }
                    delays.push(frame.delay());
                    frames.push(frame.into_buffer());
                }
                // Keep what decoded cleanly, unless the limits stopped it
                Err(e)
                    if !params.fail_on_error
                        && !frames.is_empty()
                        && !matches!(e, ImageError::Limits(_)) =>
                {
                    self.engine_log(
                        log::Level::Warn,
                        format_args!("animation truncated after {} frames: {e}", frames.len()),
                    );
                    break;
                }
                Err(e) => return Err(load_error(e)),
            }
        }

        if frames.is_empty() {
            return Err(BackendError::failed("ForeignLoad", "animation has no frames"));
        }
        Ok(Decoded {
            frames,
            delays,
            orientation: 1,
        })
    }
}

impl Default for RustEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct Decoded {
    frames: Vec<RgbaImage>,
    delays: Vec<Delay>,
    orientation: u8,
}

/// Decode a single-frame image, applying its EXIF orientation.
///
/// There is no partial result for a still: a decode error fails the load
/// whatever [`ImportParams::fail_on_error`] says.
fn decode_still(
    source: &[u8],
    format: ImageFormat,
    params: &ImportParams,
) -> Result<Decoded, BackendError> {
    let mut reader = ImageReader::with_format(Cursor::new(source), format);
    if let Some(limits) = &params.limits {
        reader.limits(decoder_limits(limits));
    }
    let mut decoder = reader.into_decoder().map_err(load_error)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    admit(&mut decoder, params, orientation)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(load_error)?;
    image.apply_orientation(orientation);

    Ok(Decoded {
        frames: vec![image.into_rgba8()],
        delays: Vec::new(),
        orientation: orientation.to_exif(),
    })
}

/// Reject a header whose geometry breaks the limits, then hand the same
/// ceilings to the decoder for everything it allocates afterwards.
fn admit(
    decoder: &mut impl ImageDecoder,
    params: &ImportParams,
    orientation: Orientation,
) -> Result<(), BackendError> {
    let Some(limits) = &params.limits else {
        return Ok(());
    };
    let (width, height) = oriented(decoder.dimensions(), orientation);
    if !limits.admits(width, height, 1) {
        return Err(BackendError::limit_exceeded(width, height, 1));
    }
    decoder.set_limits(decoder_limits(limits)).map_err(load_error)
}

/// The decoder's view of the limits. Both axes take the larger edge since
/// EXIF rotation may still swap them; the exact check happens in [`admit`].
fn decoder_limits(limits: &ResolutionLimits) -> Limits {
    let edge = limits.max_width.max(limits.max_height);
    let mut decoder = Limits::default();
    decoder.max_image_width = Some(edge);
    decoder.max_image_height = Some(edge);
    decoder.max_alloc = Some(limits.max_resolution.saturating_mul(MAX_BYTES_PER_PIXEL));
    decoder
}

/// Dimensions after `orientation` is applied.
fn oriented((width, height): (u32, u32), orientation: Orientation) -> (u32, u32) {
    match orientation {
        Orientation::Rotate90
        | Orientation::Rotate270
        | Orientation::Rotate90FlipH
        | Orientation::Rotate270FlipH => (height, width),
        _ => (width, height),
    }
}

impl ImageEngine for RustEngine {
    type Image = RasterImage;

    fn startup(&self, config: &EngineConfig) -> Result<(), BackendError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency.max(1))
            .thread_name(|i| format!("imgrelay-engine-{i}"))
            .build()
            .map_err(|e| BackendError::failed("RustEngine", e.to_string()))?;

        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(pool));
        *self.log_level.write().unwrap_or_else(PoisonError::into_inner) = config.log_level;

        // No operation cache; the limits are accepted for compatibility
        log::debug!(
            target: LOG_TARGET,
            "cache limits: files {}, mem {}, size {}",
            config.max_cache_files,
            config.max_cache_mem,
            config.max_cache_size
        );
        Ok(())
    }

    fn shutdown(&self) {
        self.pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn load_image(&self, source: &[u8], params: &ImportParams) -> Result<RasterImage, BackendError> {
        let pool = self.pool()?;
        let decoded = self.decode(source, params)?;
        self.engine_log(
            log::Level::Debug,
            format_args!(
                "decoded {}x{} x{} frames",
                decoded.frames[0].width(),
                decoded.frames[0].height(),
                decoded.frames.len()
            ),
        );
        Ok(RasterImage {
            frames: decoded.frames,
            delays: decoded.delays,
            orientation: decoded.orientation,
            pool,
        })
    }

    fn load_thumbnail(
        &self,
        source: &[u8],
        width: u32,
        height: u32,
        crop: Crop,
        size: Size,
        params: &ImportParams,
    ) -> Result<RasterImage, BackendError> {
        let mut image = self.load_image(source, params)?;
        if let Some(limits) = &params.limits {
            operations::check_resample(&image, width, height, crop, size, limits)?;
        }
        image.thumbnail_with_size(width, height, crop, size)?;
        Ok(image)
    }
}

/// Decoded RGBA frames of equal size.
pub struct RasterImage {
    /// Never empty.
    frames: Vec<RgbaImage>,
    delays: Vec<Delay>,
    orientation: u8,
    pool: Arc<rayon::ThreadPool>,
}

impl RasterImage {
    fn first(&self) -> &RgbaImage {
        &self.frames[0]
    }

    /// Replace every frame with `op(frame)`, in parallel on the engine pool.
    fn map_frames<F>(&mut self, op: F)
    where
        F: Fn(&RgbaImage) -> RgbaImage + Sync + Send,
    {
        let frames = std::mem::take(&mut self.frames);
        self.frames = self
            .pool
            .install(|| frames.par_iter().map(&op).collect());
    }

    fn delay(&self, index: usize) -> Delay {
        self.delays
            .get(index)
            .copied()
            .unwrap_or_else(|| Delay::from_numer_denom_ms(DEFAULT_DELAY_MS, 1))
    }
}

impl ImageHandle for RasterImage {
    fn width(&self) -> u32 {
        self.first().width()
    }

    fn height(&self) -> u32 {
        self.first().height() * self.frames.len() as u32
    }

    fn page_height(&self) -> u32 {
        self.first().height()
    }

    fn frames(&self) -> u32 {
        self.frames.len() as u32
    }

    fn orientation(&self) -> u8 {
        self.orientation
    }

    fn thumbnail_with_size(
        &mut self,
        width: u32,
        height: u32,
        crop: Crop,
        size: Size,
    ) -> Result<(), BackendError> {
        let source = (self.width(), self.page_height());
        let plan = plan_thumbnail(source, (width, height), crop != Crop::None, size);

        let (scaled_w, scaled_h) = plan.scaled;
        if plan.scaled != source {
            self.map_frames(|f| imageops::resize(f, scaled_w, scaled_h, FilterType::Lanczos3));
        }
        if let Some((crop_w, crop_h)) = plan.crop {
            let (left, top) = crop_origin(self.first(), (crop_w, crop_h), crop);
            self.map_frames(|f| imageops::crop_imm(f, left, top, crop_w, crop_h).to_image());
        }
        Ok(())
    }

    fn extract_area(
        &mut self,
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        let fits_x = left.checked_add(width).is_some_and(|r| r <= self.width());
        let fits_y = top.checked_add(height).is_some_and(|b| b <= self.page_height());
        if width == 0 || height == 0 || !fits_x || !fits_y {
            return Err(BackendError::failed("extract_area", "bad extract area"));
        }
        self.map_frames(|f| imageops::crop_imm(f, left, top, width, height).to_image());
        Ok(())
    }

    fn flip(&mut self, direction: Direction) -> Result<(), BackendError> {
        match direction {
            Direction::Horizontal => self.map_frames(|f| imageops::flip_horizontal(f)),
            Direction::Vertical => self.map_frames(|f| imageops::flip_vertical(f)),
        }
        Ok(())
    }

    fn rotate(&mut self, angle: Angle) -> Result<(), BackendError> {
        match angle {
            Angle::D90 => self.map_frames(|f| imageops::rotate90(f)),
            Angle::D180 => self.map_frames(|f| imageops::rotate180(f)),
            Angle::D270 => self.map_frames(|f| imageops::rotate270(f)),
        }
        Ok(())
    }

    fn grayscale(&mut self) -> Result<(), BackendError> {
        self.map_frames(|f| DynamicImage::ImageRgba8(f.clone()).grayscale().into_rgba8());
        Ok(())
    }

    fn blur(&mut self, sigma: f32) -> Result<(), BackendError> {
        if sigma > 0.0 {
            self.map_frames(|f| imageops::blur(f, sigma));
        }
        Ok(())
    }

    fn sharpen(&mut self, sigma: f32) -> Result<(), BackendError> {
        if sigma > 0.0 {
            self.map_frames(|f| imageops::unsharpen(f, sigma, 0));
        }
        Ok(())
    }

    fn brighten(&mut self, delta: i32) -> Result<(), BackendError> {
        if delta != 0 {
            self.map_frames(|f| imageops::brighten(f, delta));
        }
        Ok(())
    }

    fn contrast(&mut self, amount: f32) -> Result<(), BackendError> {
        if amount != 0.0 {
            self.map_frames(|f| {
                let mut out = imageops::contrast(f, amount);
                // imageops stretches alpha too
                for (dst, src) in out.pixels_mut().zip(f.pixels()) {
                    dst[3] = src[3];
                }
                out
            });
        }
        Ok(())
    }

    fn hue_rotate(&mut self, degrees: i32) -> Result<(), BackendError> {
        if degrees.rem_euclid(360) != 0 {
            self.map_frames(|f| imageops::huerotate(f, degrees));
        }
        Ok(())
    }

    fn composite(&mut self, overlay: &Self, left: i64, top: i64) -> Result<(), BackendError> {
        let top_layer = overlay.first();
        self.map_frames(|f| {
            let mut frame = f.clone();
            imageops::overlay(&mut frame, top_layer, left, top);
            frame
        });
        Ok(())
    }

    fn encode(&self, format: OutputFormat, quality: Quality) -> Result<Vec<u8>, BackendError> {
        let mut buf = Vec::new();
        let q = quality.value() as u8;
        match format {
            OutputFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgba8(self.first().clone()).into_rgb8();
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, q);
                DynamicImage::ImageRgb8(rgb)
                    .write_with_encoder(encoder)
                    .map_err(save_error)?;
            }
            OutputFormat::Png => {
                let encoder = image::codecs::png::PngEncoder::new(&mut buf);
                DynamicImage::ImageRgba8(self.first().clone())
                    .write_with_encoder(encoder)
                    .map_err(save_error)?;
            }
            OutputFormat::Gif => {
                let mut encoder = GifEncoder::new(&mut buf);
                encoder.set_repeat(Repeat::Infinite).map_err(save_error)?;
                let frames = self
                    .frames
                    .iter()
                    .enumerate()
                    .map(|(i, f)| Frame::from_parts(f.clone(), 0, 0, self.delay(i)));
                encoder.encode_frames(frames).map_err(save_error)?;
            }
            OutputFormat::Webp => {
                let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buf);
                DynamicImage::ImageRgba8(self.first().clone())
                    .write_with_encoder(encoder)
                    .map_err(save_error)?;
            }
            OutputFormat::Avif => {
                let encoder =
                    image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut buf, 6, q);
                DynamicImage::ImageRgba8(self.first().clone())
                    .write_with_encoder(encoder)
                    .map_err(save_error)?;
            }
        }
        Ok(buf)
    }
}

/// Where to cut a `window` out of `frame` for the given crop policy.
fn crop_origin(frame: &RgbaImage, window: (u32, u32), crop: Crop) -> (u32, u32) {
    match crop {
        Crop::Attention | Crop::High => interest_origin(frame, window, crop),
        Crop::Centre | Crop::None => anchor_offset(frame.dimensions(), window, Crop::Centre),
    }
}

fn luminance(p: &Rgba<u8>) -> u32 {
    (299 * p[0] as u32 + 587 * p[1] as u32 + 114 * p[2] as u32) / 1000
}

fn edge_energy(frame: &RgbaImage, x: u32, y: u32) -> u32 {
    let here = luminance(frame.get_pixel(x, y));
    let right = if x + 1 < frame.width() {
        luminance(frame.get_pixel(x + 1, y))
    } else {
        here
    };
    let below = if y + 1 < frame.height() {
        luminance(frame.get_pixel(x, y + 1))
    } else {
        here
    };
    here.abs_diff(right) + here.abs_diff(below)
}

/// Origin of the window with the most edge energy (attention) or the most
/// light (high), searched independently along each axis.
fn interest_origin(frame: &RgbaImage, window: (u32, u32), crop: Crop) -> (u32, u32) {
    let (w, h) = frame.dimensions();
    let mut cols = vec![0u64; w as usize];
    let mut rows = vec![0u64; h as usize];
    for (x, y, pixel) in frame.enumerate_pixels() {
        let score = u64::from(match crop {
            Crop::High => luminance(pixel),
            _ => edge_energy(frame, x, y),
        });
        cols[x as usize] += score;
        rows[y as usize] += score;
    }
    (
        best_window(&cols, window.0 as usize) as u32,
        best_window(&rows, window.1 as usize) as u32,
    )
}

/// Start of the `window`-long run with the largest sum. Ties go to the
/// centred run, then to the earliest.
fn best_window(profile: &[u64], window: usize) -> usize {
    if window == 0 || window >= profile.len() {
        return 0;
    }
    let mut prefix = Vec::with_capacity(profile.len() + 1);
    prefix.push(0u64);
    for v in profile {
        prefix.push(prefix[prefix.len() - 1] + v);
    }
    let sum = |start: usize| prefix[start + window] - prefix[start];

    let centre = (profile.len() - window) / 2;
    (0..=profile.len() - window).fold(centre, |best, start| {
        if sum(start) > sum(best) { start } else { best }
    })
}
