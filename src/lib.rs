//! # imgrelay
//!
//! The transformation core of an on-the-fly image server. A request is a
//! source [`Blob`] plus pre-parsed [`Params`]; a [`Pipeline`] of processors
//! turns it into a transformed image, or into a classified [`Error`] the
//! request layer maps onto a response status.
//!
//! # Architecture
//!
//! ```text
//! request ─▶ Pipeline ─▶ RawPreviewProcessor ─Forward(preview JPEG)─▶ ImageProcessor ─▶ Blob
//!                                                                        │
//!                                                          ImageEngine (RustEngine)
//! ```
//!
//! Processors hand work down the chain by *forwarding*, optionally with an
//! intermediate artifact that replaces the blob for the next stage. The
//! first processor to return `Done` ends the request.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`processor`] | `Processor` trait, forwarding `Outcome`, `Pipeline` driver, resource `Loader`s |
//! | [`transform`] | `ImageProcessor`: decode, resize/crop, filters, encode |
//! | [`raw_preview`] | `RawPreviewProcessor`: embedded JPEG previews out of camera RAW files |
//! | [`imaging`] | Engine traits, the bundled `image`-crate engine, crop geometry, resolution guard |
//! | [`blob`] | Lazily materialized image data with format sniffing and metadata |
//! | [`lifecycle`] | Reference-counted startup/shutdown of the shared engine |
//! | [`config`] | `imgrelay.toml` loading, layering over stock defaults, validation |
//! | [`context`] | Per-request cancellation and deadline |
//! | [`error`] | Request-level error classification |
//! | [`params`] | Request parameters and the `name(args)` filter syntax |
//!
//! # Design Decisions
//!
//! ## Decompression Bomb Protection
//!
//! [`imaging::ResolutionLimits`] are enforced three times: by the decoder
//! from the image header before any pixels exist, on the planned size of
//! every resample, and on the handle itself after decoding and filtering.
//! Animated images are judged per frame for height and by the whole strip
//! for pixel count, so a long animation of small frames costs what it
//! actually costs to hold in memory.
//!
//! ## Frame-Aware Cropping
//!
//! Animated frames are stacked vertically in one handle. The engine's
//! single-frame crop would cut across frame boundaries, so animated crops
//! pre-scale without cropping and then extract the same rectangle from
//! every frame. See [`imaging::operations`].
//!
//! ## One Engine Per Process
//!
//! Native engines are process-wide. [`lifecycle::EngineLifecycle`] counts
//! acquisitions so any number of processors can share one engine, and only
//! the first startup and last shutdown reach it.

pub mod blob;
pub mod config;
pub mod context;
pub mod error;
pub mod imaging;
pub mod lifecycle;
pub mod params;
pub mod processor;
pub mod raw_preview;
pub mod transform;

pub use blob::{Blob, BlobType, Meta};
pub use context::Context;
pub use error::{Error, ErrorKind};
pub use params::{Filter, Params};
pub use processor::{DirLoader, Loader, NoLoader, Outcome, Pipeline, Processor};
pub use raw_preview::RawPreviewProcessor;
pub use transform::ImageProcessor;
