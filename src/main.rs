use clap::{Parser, Subcommand};
use imgrelay::config;
use imgrelay::imaging::{Crop, RustEngine, Size};
use imgrelay::params::parse_focal;
use imgrelay::{
    Blob, Context, DirLoader, Filter, ImageProcessor, Params, Pipeline, RawPreviewProcessor,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn version_string() -> &'static str {
    if env!("ON_RELEASE_TAG") == "true" {
        return env!("CARGO_PKG_VERSION");
    }
    match env!("GIT_HASH") {
        "" => "dev@unknown",
        // Built once per process
        hash => Box::leak(format!("dev@{hash}").into_boxed_str()),
    }
}

#[derive(Parser)]
#[command(name = "imgrelay")]
#[command(about = "Transform images through the imgrelay processor chain")]
#[command(long_about = "\
Transform images through the imgrelay processor chain

Each input runs through two processors:

  raw-preview   camera RAW (DNG, NEF, CR2, ARW, ...) → embedded JPEG preview
  image         decode → resize/crop → flips → filters → encode

Filters use the name(args) syntax and apply in order:

  format(webp)            output format: jpeg, png, gif, webp, avif
  quality(70)             lossy encoder quality, 1-100
  grayscale()
  blur(2.5) / sharpen(1)  gaussian sigma
  brightness(20)          -100 to 100 percent
  contrast(-15)           -100 to 100
  hue(120)                rotate hues by degrees
  rotate(90)              right angles only
  watermark(logo.png,-10,center)
                          overlay resolved next to the input; negative
                          offsets count from the far edge

Limits and engine settings come from imgrelay.toml (see 'imgrelay gen-config').")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transform one image
    Transform(TransformArgs),
    /// Print a stock imgrelay.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct TransformArgs {
    /// Source image
    input: PathBuf,

    /// Where to write the result ('-' for stdout)
    #[arg(short, long)]
    output: PathBuf,

    /// Target width (0 = unconstrained)
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Target height (0 = unconstrained)
    #[arg(long, default_value_t = 0)]
    height: u32,

    /// Fit inside the box instead of cropping to it
    #[arg(long)]
    fit_in: bool,

    /// Crop anchor: none, centre, attention, high
    #[arg(long, default_value = "centre")]
    crop: Crop,

    /// Size policy: both, down, force
    #[arg(long, default_value = "both")]
    size: Size,

    /// Focal point as fractional x,y (e.g. 0.3,0.6)
    #[arg(long, value_parser = parse_focal)]
    focal: Option<(f64, f64)>,

    /// Mirror left to right
    #[arg(long)]
    flip_h: bool,

    /// Mirror top to bottom
    #[arg(long)]
    flip_v: bool,

    /// Filter to apply, e.g. 'blur(2)'; repeatable
    #[arg(long = "filter")]
    filters: Vec<Filter>,

    /// Write image metadata as JSON instead of pixels
    #[arg(long)]
    meta: bool,

    /// Config file
    #[arg(long, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl TransformArgs {
    fn params(&self) -> Params {
        Params {
            width: self.width,
            height: self.height,
            fit_in: self.fit_in,
            flip_h: self.flip_h,
            flip_v: self.flip_v,
            crop: self.crop,
            size: self.size,
            focal: self.focal,
            filters: self.filters.clone(),
            meta: self.meta,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Transform(args) => transform(&args)?,
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn transform(args: &TransformArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(&args.config)?;
    let pipeline = Pipeline::new(vec![
        Arc::new(RawPreviewProcessor::new()),
        Arc::new(ImageProcessor::new(RustEngine::shared_lifecycle(), config)),
    ]);

    let ctx = match args.timeout {
        Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };
    pipeline.startup(&ctx)?;

    let root = args
        .input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let loader = DirLoader::new(root);

    let result = pipeline.run(&ctx, Blob::from_path(&args.input), args.params(), &loader);
    let shutdown = pipeline.shutdown(&Context::background());
    let blob = result.inspect_err(|e| {
        log::error!("{}: {e} (status {})", args.input.display(), e.status());
    })?;
    shutdown?;

    let bytes = blob.read_all()?;
    if args.output.as_os_str() == "-" {
        std::io::stdout().lock().write_all(&bytes)?;
    } else {
        std::fs::write(&args.output, &bytes)?;
        log::info!(
            "{} → {} ({}, {} bytes)",
            args.input.display(),
            args.output.display(),
            blob.content_type().unwrap_or("application/octet-stream"),
            bytes.len()
        );
    }
    Ok(())
}
