//! The accepting processor: decode, resize, filter, encode.
//!
//! ```text
//! blob ─▶ sniff ─▶ load (+ shrink/crop) ─▶ guard ─▶ flips ─▶ filters ─▶ guard ─▶ encode
//! ```
//!
//! Load path selection:
//!
//! | Source | Focal point | Path |
//! |---|---|---|
//! | any | set, both edges, not fit-in or forced | `load_image` + [`operations::focal_thumbnail`] |
//! | JPEG | none | `load_thumbnail` (decoder does the resize) |
//! | other | none | `load_image` + [`operations::thumbnail`] |
//!
//! Every decoded handle passes the [`ResolutionLimits`] guard before any
//! further work, and again once geometry and filters are done.

use crate::blob::{Blob, BlobType, Meta};
use crate::config::ProcessorConfig;
use crate::context::Context;
use crate::error::Error;
use crate::imaging::{
    Angle, BackendError, Crop, Direction, ImageEngine, ImageHandle, OutputFormat, Quality,
    ResolutionLimits, Size, operations,
};
use crate::lifecycle::EngineLifecycle;
use crate::params::{Filter, Params};
use crate::processor::{Loader, Outcome, Processor};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

pub struct ImageProcessor<E: ImageEngine> {
    lifecycle: Arc<EngineLifecycle<E>>,
    config: ProcessorConfig,
    disabled: HashSet<String>,
}

/// Encode settings collected while filters run.
#[derive(Debug, Clone, Copy)]
struct Encoding {
    format: Option<OutputFormat>,
    quality: Quality,
}

/// Why a filter did not apply.
enum FilterError {
    /// Bad arguments or not applicable; logged and skipped.
    Skip(String),
    /// Aborts the request.
    Fatal(Error),
}

impl From<Error> for FilterError {
    fn from(e: Error) -> Self {
        Self::Fatal(e)
    }
}

impl From<BackendError> for FilterError {
    fn from(e: BackendError) -> Self {
        Self::Fatal(e.into())
    }
}

fn skip(reason: impl Into<String>) -> FilterError {
    FilterError::Skip(reason.into())
}

impl<E: ImageEngine> ImageProcessor<E> {
    pub fn new(lifecycle: Arc<EngineLifecycle<E>>, config: ProcessorConfig) -> Self {
        let disabled = config.filters.disabled_names().into_iter().collect();
        Self {
            lifecycle,
            config,
            disabled,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn engine(&self) -> &E {
        self.lifecycle.engine()
    }

    /// Decode, resize and crop according to `params`.
    fn load(
        &self,
        source: &[u8],
        blob_type: BlobType,
        params: &Params,
        limits: &ResolutionLimits,
    ) -> Result<E::Image, Error> {
        let import = self.config.import_params();
        let load_full = || limits.check(self.engine().load_image(source, &import).map_err(Error::from));

        let Some((width, height, crop)) = target(params, limits) else {
            return load_full();
        };

        // A focal point implies cropping whatever the crop anchor says
        if let Some((fx, fy)) = params.focal {
            if focal_applies(params) {
                let mut image = load_full()?;
                operations::focal_thumbnail(&mut image, width, height, fx, fy, limits)?;
                return Ok(image);
            }
        }

        if blob_type == BlobType::Jpeg {
            let image = self
                .engine()
                .load_thumbnail(source, width, height, crop, params.size, &import)
                .map_err(Error::from);
            return limits.check(image);
        }

        let mut image = load_full()?;
        operations::thumbnail(&mut image, width, height, crop, params.size, limits)?;
        Ok(image)
    }

    fn apply_filters(
        &self,
        ctx: &Context,
        image: &mut E::Image,
        filters: &[Filter],
        loader: &dyn Loader,
        encoding: &mut Encoding,
    ) -> Result<(), Error> {
        let max = self.config.filters.max_ops().unwrap_or(usize::MAX);
        if filters.len() > max {
            log::warn!(
                "request has {} filters, applying only the first {max}",
                filters.len()
            );
        }

        for filter in filters.iter().take(max) {
            ctx.check()?;
            if self.disabled.contains(&filter.name) {
                log::warn!("filter {} is disabled, skipping", filter.name);
                continue;
            }
            match self.apply_filter(ctx, image, filter, loader, encoding) {
                Ok(()) => log::debug!("applied filter {filter}"),
                Err(FilterError::Skip(reason)) => log::warn!("skipping filter {filter}: {reason}"),
                Err(FilterError::Fatal(e)) => return Err(e),
            }
        }
        Ok(())
    }

    fn apply_filter(
        &self,
        ctx: &Context,
        image: &mut E::Image,
        filter: &Filter,
        loader: &dyn Loader,
        encoding: &mut Encoding,
    ) -> Result<(), FilterError> {
        match filter.name.as_str() {
            "format" => {
                let format: OutputFormat = arg(filter, 0)?;
                encoding.format = Some(format);
            }
            "quality" => {
                let quality: u32 = arg(filter, 0)?;
                encoding.quality = Quality::new(quality);
            }
            "grayscale" => image.grayscale()?,
            "blur" => image.blur(sigma(filter)?)?,
            "sharpen" => image.sharpen(sigma(filter)?)?,
            "brightness" => {
                let percent = percent(filter)?;
                image.brighten(percent * 255 / 100)?;
            }
            "contrast" => image.contrast(percent(filter)? as f32)?,
            "hue" => {
                let degrees: i32 = arg(filter, 0)?;
                image.hue_rotate(degrees.rem_euclid(360))?;
            }
            "rotate" => {
                let degrees: i32 = arg(filter, 0)?;
                match Angle::from_degrees(degrees) {
                    Some(angle) => image.rotate(angle)?,
                    None if degrees.rem_euclid(360) == 0 => {}
                    None => return Err(skip(format!("{degrees} is not a right angle"))),
                }
            }
            "watermark" => self.watermark(ctx, image, filter, loader)?,
            _ => return Err(skip("unknown filter")),
        }
        Ok(())
    }

    /// `watermark(name, x, y)`: overlay a loader-resolved image.
    fn watermark(
        &self,
        ctx: &Context,
        image: &mut E::Image,
        filter: &Filter,
        loader: &dyn Loader,
    ) -> Result<(), FilterError> {
        let name = filter
            .arg(0)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| skip("missing image name"))?;

        let mark = loader.load(ctx, name)?;
        let bytes = mark.read_all()?;
        let limits = self.config.limits();
        let overlay = limits.check(
            self.engine()
                .load_image(&bytes, &self.config.import_params())
                .map_err(Error::from),
        )?;

        let left = position(filter.arg(1), image.width(), overlay.width())?;
        let top = position(filter.arg(2), image.page_height(), overlay.page_height())?;
        image.composite(&overlay, left, top)?;
        Ok(())
    }
}

impl<E: ImageEngine> Processor for ImageProcessor<E> {
    fn name(&self) -> &str {
        "image"
    }

    fn startup(&self, ctx: &Context) -> Result<(), Error> {
        ctx.check()?;
        self.lifecycle.acquire(&self.config.engine_config())
    }

    fn shutdown(&self, _ctx: &Context) -> Result<(), Error> {
        self.lifecycle.release();
        Ok(())
    }

    fn process(
        &self,
        ctx: &Context,
        blob: &Blob,
        params: &Params,
        loader: &dyn Loader,
    ) -> Result<Outcome, Error> {
        if blob.is_empty() {
            return Err(Error::NotFound);
        }
        let source = blob.read_all()?;
        let blob_type = BlobType::detect(&source);
        log::debug!("decoding {} byte {:?} source", source.len(), blob_type);

        ctx.check()?;
        let limits = self.config.limits();
        let mut image = self.load(&source, blob_type, params, &limits)?;

        ctx.check()?;
        if params.flip_h {
            image.flip(Direction::Horizontal)?;
        }
        if params.flip_v {
            image.flip(Direction::Vertical)?;
        }

        let mut encoding = Encoding {
            format: None,
            quality: self.config.quality(),
        };
        self.apply_filters(ctx, &mut image, &params.filters, loader, &mut encoding)?;
        let image = limits.check(Ok(image))?;

        let format = encoding
            .format
            .or(blob_type.output_format())
            .unwrap_or(OutputFormat::Jpeg);

        if params.meta {
            let meta = Meta {
                format: format.extension().to_string(),
                content_type: format.content_type().to_string(),
                width: image.width(),
                height: image.page_height(),
                orientation: image.orientation(),
            };
            let json = serde_json::to_vec(&meta).map_err(|e| Error::Internal(e.to_string()))?;
            let mut out = Blob::from_bytes(json);
            out.set_content_type("application/json");
            out.set_meta(meta);
            return Ok(Outcome::Done(out));
        }

        ctx.check()?;
        let bytes = image.encode(format, encoding.quality)?;
        log::debug!(
            "encoded {}x{} {format} ({} bytes)",
            image.width(),
            image.page_height(),
            bytes.len()
        );
        let meta = Meta {
            format: format.extension().to_string(),
            content_type: format.content_type().to_string(),
            width: image.width(),
            height: image.page_height(),
            orientation: 1,
        };
        Ok(Outcome::Done(Blob::from_bytes_with_meta(bytes, meta)))
    }
}

/// Resize target and effective crop. `None` means keep the source size.
///
/// A zero dimension is unconstrained: it is replaced by the limit on that
/// axis and the image is fitted rather than cropped.
fn target(params: &Params, limits: &ResolutionLimits) -> Option<(u32, u32, Crop)> {
    let crop = if params.fit_in { Crop::None } else { params.crop };
    match (params.width, params.height) {
        (0, 0) => None,
        (0, h) => Some((limits.max_width, h, Crop::None)),
        (w, 0) => Some((w, limits.max_height, Crop::None)),
        (w, h) => Some((w, h, crop)),
    }
}

fn focal_applies(params: &Params) -> bool {
    !params.fit_in && params.size != Size::Force && params.width > 0 && params.height > 0
}

fn arg<T: FromStr>(filter: &Filter, index: usize) -> Result<T, FilterError> {
    let raw = filter
        .arg(index)
        .ok_or_else(|| skip(format!("missing argument {}", index + 1)))?;
    raw.parse()
        .map_err(|_| skip(format!("invalid argument '{raw}'")))
}

fn sigma(filter: &Filter) -> Result<f32, FilterError> {
    let sigma: f32 = arg(filter, 0)?;
    if sigma > 0.0 && sigma.is_finite() {
        Ok(sigma)
    } else {
        Err(skip("sigma must be positive"))
    }
}

/// A signed percentage in -100..=100.
fn percent(filter: &Filter) -> Result<i32, FilterError> {
    let value: i32 = arg(filter, 0)?;
    if (-100..=100).contains(&value) {
        Ok(value)
    } else {
        Err(skip(format!("{value} is outside -100..100")))
    }
}

/// Overlay offset along one axis.
///
/// Accepts a pixel offset (negative counts from the far edge), `center`,
/// or an edge keyword. Missing means 0.
fn position(arg: Option<&str>, size: u32, mark: u32) -> Result<i64, FilterError> {
    let far = i64::from(size) - i64::from(mark);
    match arg.map(str::trim).unwrap_or("") {
        "" | "left" | "top" => Ok(0),
        "right" | "bottom" => Ok(far),
        "center" | "centre" => Ok(far / 2),
        raw => {
            let offset: i64 = raw
                .parse()
                .map_err(|_| skip(format!("invalid position '{raw}'")))?;
            Ok(if offset < 0 { far + offset } else { offset })
        }
    }
}
