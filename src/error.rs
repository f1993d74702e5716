use crate::frame::FrameShape;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("unknown device '{0}' (expected cpu, cuda:N or tensorrt:N)")]
    Device(String),

    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
}

/// Fatal pipeline failures
///
/// Any of these invalidates the run: units are stopped and joined, the sink
/// is aborted and no output is considered valid.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to probe source video")]
    Probe(#[source] anyhow::Error),

    #[error("source video has no frames to process")]
    NoFrames,

    #[error("failed to decode frame {index}")]
    Decode {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("decoder ended after {decoded} of {expected} frames")]
    SourceTruncated { expected: usize, decoded: usize },

    #[error("worker {worker} failed to load the matting model")]
    ModelLoad {
        worker: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("matting failed on batch {sequence}")]
    Matting {
        sequence: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("worker {worker} was specialised for {expected} frames but received {found}")]
    ShapeChanged {
        worker: usize,
        expected: FrameShape,
        found: FrameShape,
    },

    #[error("batch {sequence}: model returned {found} mattes for {expected} frames")]
    MatteCount {
        sequence: usize,
        expected: usize,
        found: usize,
    },

    #[error("matte for frame {index} is {found}, encoder expects {expected}")]
    MatteShape {
        index: usize,
        expected: FrameShape,
        found: FrameShape,
    },

    #[error("failed to start the encoder")]
    EncoderSpawn(#[source] anyhow::Error),

    #[error("failed to write frame {frame} to the encoder")]
    EncoderWrite {
        frame: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("encoder did not finish cleanly")]
    EncoderFailed(#[source] anyhow::Error),

    #[error("failed to spawn pipeline unit {unit}")]
    UnitSpawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline unit {unit} panicked")]
    UnitPanicked { unit: String },

    #[error("pipeline was cancelled")]
    Cancelled,

    /// A unit was woken because another unit already failed
    #[error("pipeline aborted")]
    Aborted,
}
