//! Lazily-materialized image data.
//!
//! A [`Blob`] is backed by a filesystem path, an in-memory buffer, or both.
//! Path-backed blobs read the file on first [`Blob::read_all`] and keep the
//! bytes for the rest of their life, even when the file is empty. The buffer sits behind a reader/writer
//! lock: readers share it, and the one caller that materializes it holds the
//! write lock while it reads the file, so every caller sees either nothing or
//! the complete buffer.
//!
//! File access goes through the [`FileReader`] trait so tests can count it.

use crate::error::Error;
use crate::imaging::OutputFormat;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Reads whole files for path-backed blobs.
pub trait FileReader: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// [`FileReader`] over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileReader;

impl FileReader for StdFileReader {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Image attributes attached to a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub format: String,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
    pub orientation: u8,
}

/// Container format sniffed from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobType {
    Unknown,
    Jpeg,
    Png,
    Gif,
    Webp,
    Tiff,
    Bmp,
    Avif,
}

impl BlobType {
    pub fn detect(bytes: &[u8]) -> Self {
        use image::ImageFormat;
        match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => Self::Jpeg,
            Ok(ImageFormat::Png) => Self::Png,
            Ok(ImageFormat::Gif) => Self::Gif,
            Ok(ImageFormat::WebP) => Self::Webp,
            Ok(ImageFormat::Tiff) => Self::Tiff,
            Ok(ImageFormat::Bmp) => Self::Bmp,
            Ok(ImageFormat::Avif) => Self::Avif,
            _ => Self::Unknown,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Unknown => "application/octet-stream",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
            Self::Avif => "image/avif",
        }
    }

    /// The matching encodable format, if the engine can write this type.
    pub fn output_format(self) -> Option<OutputFormat> {
        match self {
            Self::Jpeg => Some(OutputFormat::Jpeg),
            Self::Png => Some(OutputFormat::Png),
            Self::Gif => Some(OutputFormat::Gif),
            Self::Webp => Some(OutputFormat::Webp),
            Self::Avif => Some(OutputFormat::Avif),
            Self::Tiff | Self::Bmp | Self::Unknown => None,
        }
    }
}

pub struct Blob {
    path: Option<PathBuf>,
    /// `None` until materialized.
    buf: RwLock<Option<Bytes>>,
    reader: Arc<dyn FileReader>,
    content_type: Option<String>,
    meta: Option<Meta>,
}

impl Blob {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::with_file_reader(path, Arc::new(StdFileReader))
    }

    /// Path-backed blob that reads through `reader`.
    pub fn with_file_reader(path: impl Into<PathBuf>, reader: Arc<dyn FileReader>) -> Self {
        let path = path.into();
        Self {
            path: (!path.as_os_str().is_empty()).then_some(path),
            buf: RwLock::new(None),
            reader,
            content_type: None,
            meta: None,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes: Bytes = bytes.into();
        Self {
            path: None,
            // No bytes and no path: nothing to materialize later
            buf: RwLock::new((!bytes.is_empty()).then_some(bytes)),
            reader: Arc::new(StdFileReader),
            content_type: None,
            meta: None,
        }
    }

    pub fn from_bytes_with_meta(bytes: impl Into<Bytes>, meta: Meta) -> Self {
        let mut blob = Self::from_bytes(bytes);
        blob.content_type = Some(meta.content_type.clone());
        blob.meta = Some(meta);
        blob
    }

    /// A blob with no data at all.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// No path and no bytes. Never touches the filesystem.
    pub fn is_empty(&self) -> bool {
        self.path.is_none() && self.cached().is_none()
    }

    /// The blob's bytes, reading the backing file on first use.
    pub fn read_all(&self) -> Result<Bytes, Error> {
        if let Some(buf) = self.cached() {
            return Ok(buf);
        }
        let Some(path) = &self.path else {
            return Err(Error::NotFound);
        };

        let mut buf = self.buf.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have materialized it while we waited
        if let Some(bytes) = buf.as_ref() {
            return Ok(bytes.clone());
        }
        let bytes = Bytes::from(self.reader.read(path)?);
        *buf = Some(bytes.clone());
        Ok(bytes)
    }

    /// Sniff the container format. Materializes the buffer.
    pub fn blob_type(&self) -> Result<BlobType, Error> {
        Ok(BlobType::detect(&self.read_all()?))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn meta(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    pub fn set_meta(&mut self, meta: Meta) {
        self.meta = Some(meta);
    }

    /// Explicit content type, falling back to the one in [`Meta`].
    pub fn content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .or_else(|| self.meta.as_ref().map(|m| m.content_type.as_str()))
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    fn cached(&self) -> Option<Bytes> {
        self.buf
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("path", &self.path)
            .field("cached_len", &self.cached().map(|b| b.len()))
            .field("content_type", &self.content_type)
            .field("meta", &self.meta)
            .finish()
    }
}
