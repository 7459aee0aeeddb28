//! Camera RAW front-end.
//!
//! Sits ahead of [`ImageProcessor`](crate::transform::ImageProcessor) and
//! never finishes a request itself. When the source is a TIFF-structured RAW
//! file carrying an embedded JPEG rendition, that JPEG is forwarded as the
//! artifact the next processor works on; anything else is forwarded as-is.

use crate::blob::Blob;
use crate::context::Context;
use crate::error::Error;
use crate::imaging::preview;
use crate::params::Params;
use crate::processor::{Loader, Outcome, Processor};

#[derive(Debug, Default, Clone, Copy)]
pub struct RawPreviewProcessor;

impl RawPreviewProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Processor for RawPreviewProcessor {
    fn name(&self) -> &str {
        "raw-preview"
    }

    fn startup(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }

    fn shutdown(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }

    fn process(
        &self,
        ctx: &Context,
        blob: &Blob,
        params: &Params,
        _loader: &dyn Loader,
    ) -> Result<Outcome, Error> {
        if blob.is_empty() {
            return Ok(Outcome::forward(params.clone()));
        }
        ctx.check()?;
        let data = blob.read_all()?;
        if !preview::is_tiff_container(&data) {
            return Ok(Outcome::forward(params.clone()));
        }

        match preview::find_embedded_jpeg(&data) {
            Some(jpeg) => {
                log::debug!(
                    "forwarding {} byte embedded preview from {} byte RAW",
                    jpeg.len(),
                    data.len()
                );
                let artifact = data.slice_ref(jpeg);
                Ok(Outcome::forward_with(params.clone(), Blob::from_bytes(artifact)))
            }
            None => {
                log::debug!("TIFF container without embedded preview");
                Ok(Outcome::forward(params.clone()))
            }
        }
    }
}
