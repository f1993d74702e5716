use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use vidmatte::compose::{self, Composite};
use vidmatte::matting;
use vidmatte::output::RawSink;
use vidmatte::source::FfmpegDecoder;
use vidmatte::{Device, Pipeline, PipelineConfig, PipelineReport};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video
    #[arg(short, long)]
    input: PathBuf,

    /// Output file
    #[arg(short, long)]
    output: PathBuf,

    /// What to write to the output
    #[arg(long, value_enum, default_value_t = Mode::Matte)]
    mode: Mode,

    /// Background image or video for the overlay modes
    #[arg(long)]
    background: Option<PathBuf>,

    /// TOML file with pipeline settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to segmentation model (ONNX file)
    #[arg(long)]
    model: Option<String>,

    /// Number of matting workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Frames per inference call
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Batches the decoder may run ahead of the workers
    #[arg(long)]
    prefetch_batches: Option<usize>,

    /// Completed batches allowed to wait for the encoder
    #[arg(long)]
    max_pending_batches: Option<usize>,

    /// Stop after this many frames
    #[arg(long)]
    frame_limit: Option<usize>,

    /// Output frame rate (defaults to the detected input rate)
    #[arg(long)]
    frame_rate: Option<u32>,

    /// Execution device: cpu, cuda:N or tensorrt:N
    #[arg(long)]
    device: Option<Device>,

    /// Write the raw gray matte stream instead of encoding it
    #[arg(long, conflicts_with = "mode")]
    raw: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Gray matte video
    Matte,
    /// Source with alpha channel (QuickTime Animation)
    TransparentVideo,
    /// Source with alpha channel as animated GIF
    TransparentGif,
    /// Transparent GIF over --background
    GifOverBackground,
    /// Transparent video over a --background video
    VideoOverVideo,
    /// Transparent video over a --background image
    VideoOverImage,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(prefetch) = self.prefetch_batches {
            config.prefetch_batches = prefetch;
        }
        if let Some(pending) = self.max_pending_batches {
            config.max_pending_batches = Some(pending);
        }
        if self.frame_limit.is_some() {
            config.frame_limit = self.frame_limit;
        }
        if self.frame_rate.is_some() {
            config.frame_rate = self.frame_rate;
        }
        if let Some(device) = self.device {
            config.device = device;
        }

        config.validate()?;
        Ok(config)
    }

    fn composite(&self) -> Result<Composite> {
        let background = || {
            self.background
                .clone()
                .with_context(|| format!("--mode {:?} needs --background", self.mode))
        };

        Ok(match self.mode {
            Mode::Matte => Composite::Matte,
            Mode::TransparentVideo => Composite::TransparentVideo,
            Mode::TransparentGif => Composite::TransparentGif,
            Mode::GifOverBackground => Composite::GifOverBackground(background()?),
            Mode::VideoOverVideo => Composite::VideoOverVideo(background()?),
            Mode::VideoOverImage => Composite::VideoOverImage(background()?),
        })
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = args.pipeline_config()?;

    tracing::info!("vidmatte starting");
    tracing::info!("Input: {}", args.input.display());
    tracing::info!("Output: {}", args.output.display());
    tracing::info!(
        "Workers: {}, batch size: {}, device: {}",
        config.worker_count,
        config.batch_size,
        config.device
    );

    if !args.input.exists() {
        bail!("Input {} does not exist", args.input.display());
    }

    let report = if args.raw {
        run_raw(&config, &args)?
    } else {
        let composite = args.composite()?;
        let rendered = compose::render(&config, &composite, &args.input, &args.output)?;
        for warning in &rendered.warnings {
            tracing::warn!("{}", warning);
        }
        rendered.pipeline
    };

    tracing::info!(
        "Wrote {} of {} frames in {} batches, peak {} frames buffered",
        report.frames_written,
        report.total_frames,
        report.batches,
        report.peak_buffered_frames
    );
    for (id, worker) in report.workers.iter().enumerate() {
        tracing::debug!(
            "Worker {}: {} batches, {} frames, matte={:.1}ms",
            id,
            worker.batches,
            worker.frames,
            worker.matte_time.as_secs_f64() * 1000.0
        );
    }

    Ok(())
}

/// Dump the gray matte stream without an encoder
fn run_raw(config: &PipelineConfig, args: &Args) -> Result<PipelineReport> {
    let pipeline = Pipeline::new(config.clone())?;
    let mut decoder = FfmpegDecoder::open(&args.input).context("Failed to open input video")?;
    let provider = matting::create_default_provider(config);

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let mut sink = RawSink::new(BufWriter::new(file));

    let report = pipeline.run(&mut decoder, provider.as_ref(), &mut sink)?;
    if let Some(params) = report.encoder {
        tracing::info!(
            "Raw stream: {}x{} {} at {} fps",
            params.width,
            params.height,
            params.pixel_format,
            params.frame_rate
        );
    }
    Ok(report)
}
