//! Processor chain and forwarding protocol.
//!
//! A [`Pipeline`] drives an ordered list of [`Processor`]s over one request.
//! Each processor either finishes the request ([`Outcome::Done`]), declines
//! it ([`Outcome::Forward`]), or fails. Forwarding may hand the next
//! processor a replacement blob (an intermediate artifact, e.g. a preview
//! extracted from a RAW file) and rewritten params.
//!
//! ```text
//! blob ─▶ [raw preview] ─Forward(artifact)─▶ [image] ─Done─▶ result
//!                                              │
//!                                              └─Err─▶ fatal
//! ```
//!
//! Forwarding is control flow, not an error: it never reaches the caller.
//! Exhausting the chain without a `Done` is [`Error::Unsupported`].

use crate::blob::Blob;
use crate::context::Context;
use crate::error::Error;
use crate::params::Params;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Result of one processor's attempt at a request.
#[derive(Debug)]
pub enum Outcome {
    /// Final result; the chain stops here.
    Done(Blob),
    /// Let the next processor handle it. An empty or missing artifact means
    /// "keep the blob I was given".
    Forward {
        params: Params,
        artifact: Option<Blob>,
    },
}

impl Outcome {
    pub fn forward(params: Params) -> Self {
        Self::Forward {
            params,
            artifact: None,
        }
    }

    pub fn forward_with(params: Params, artifact: Blob) -> Self {
        Self::Forward {
            params,
            artifact: Some(artifact),
        }
    }
}

/// Resolves auxiliary resources (watermarks, overlays) by name.
pub trait Loader: Send + Sync {
    fn load(&self, ctx: &Context, name: &str) -> Result<Blob, Error>;
}

impl<F> Loader for F
where
    F: Fn(&Context, &str) -> Result<Blob, Error> + Send + Sync,
{
    fn load(&self, ctx: &Context, name: &str) -> Result<Blob, Error> {
        self(ctx, name)
    }
}

/// Loader that resolves nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoader;

impl Loader for NoLoader {
    fn load(&self, _ctx: &Context, _name: &str) -> Result<Blob, Error> {
        Err(Error::NotFound)
    }
}

/// Resolves names as relative paths under a root directory.
#[derive(Debug, Clone)]
pub struct DirLoader {
    root: PathBuf,
}

impl DirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Loader for DirLoader {
    fn load(&self, ctx: &Context, name: &str) -> Result<Blob, Error> {
        ctx.check()?;
        let relative = Path::new(name);
        // Plain relative names only; no escaping the root
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if name.is_empty() || !contained {
            return Err(Error::NotFound);
        }
        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(Error::NotFound);
        }
        Ok(Blob::from_path(path))
    }
}

/// One stage of the pipeline.
pub trait Processor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn startup(&self, ctx: &Context) -> Result<(), Error>;

    fn shutdown(&self, ctx: &Context) -> Result<(), Error>;

    fn process(
        &self,
        ctx: &Context,
        blob: &Blob,
        params: &Params,
        loader: &dyn Loader,
    ) -> Result<Outcome, Error>;
}

/// An ordered chain of processors.
#[derive(Clone, Default)]
pub struct Pipeline {
    processors: Vec<Arc<dyn Processor>>,
}

impl Pipeline {
    pub fn new(processors: Vec<Arc<dyn Processor>>) -> Self {
        Self { processors }
    }

    pub fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    /// Start every processor in order, stopping at the first failure.
    pub fn startup(&self, ctx: &Context) -> Result<(), Error> {
        for processor in &self.processors {
            processor.startup(ctx)?;
            log::debug!("processor {} started", processor.name());
        }
        Ok(())
    }

    /// Shut every processor down, even after a failure; the first error is
    /// reported.
    pub fn shutdown(&self, ctx: &Context) -> Result<(), Error> {
        let mut first_err = None;
        for processor in &self.processors {
            if let Err(e) = processor.shutdown(ctx) {
                log::warn!("processor {} failed to shut down: {e}", processor.name());
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Run one request through the chain.
    pub fn run(
        &self,
        ctx: &Context,
        blob: Blob,
        params: Params,
        loader: &dyn Loader,
    ) -> Result<Blob, Error> {
        let mut blob = blob;
        let mut params = params;

        for processor in &self.processors {
            ctx.check()?;
            log::debug!("processor {}: processing", processor.name());
            match processor.process(ctx, &blob, &params, loader)? {
                Outcome::Done(result) => return Ok(result),
                Outcome::Forward {
                    params: forwarded,
                    artifact,
                } => {
                    params = forwarded;
                    match artifact.filter(|a| !a.is_empty()) {
                        Some(artifact) => {
                            log::debug!("processor {}: forwarded with artifact", processor.name());
                            blob = artifact;
                        }
                        None => log::debug!("processor {}: forwarded", processor.name()),
                    }
                }
            }
        }

        Err(Error::Unsupported)
    }
}
