//! Imaging engine boundary and geometry.
//!
//! | Concern | Module |
//! |---|---|
//! | **Engine traits** | [`backend`]: [`ImageEngine`], [`ImageHandle`], [`BackendError`] |
//! | **Bundled engine** | [`rust_backend`]: [`RustEngine`] on the `image` crate |
//! | **Dimension math** | [`calculations`]: pure, unit testable |
//! | **Thumbnail / crop** | [`operations`]: calculations + handle primitives |
//! | **Bomb protection** | [`guard`]: [`ResolutionLimits`] |
//! | **RAW previews** | [`preview`]: embedded JPEG lookup in TIFF containers |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing engine operations
//! - **Backend**: [`ImageEngine`] trait + [`RustEngine`]
//! - **Operations**: Geometry combining calculations + handle primitives

pub mod backend;
pub mod calculations;
pub mod guard;
pub mod operations;
mod params;
pub mod preview;
pub mod rust_backend;

pub use backend::{
    Angle, BackendError, Direction, EngineConfig, ImageEngine, ImageHandle,
};
pub use guard::ResolutionLimits;
pub use params::{Crop, ImportParams, OutputFormat, Quality, Size};
pub use rust_backend::{RasterImage, RustEngine};
