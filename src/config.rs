//! Pipeline configuration
//!
//! Every value the pipeline core reads lives in [`PipelineConfig`]. It can be
//! loaded from a TOML file, and the CLI overrides individual fields on top.
//!
//! ```toml
//! worker_count = 2
//! batch_size = 4
//! model = "~/.u2net/u2net.onnx"
//! prefetch_batches = 4
//! device = "cuda:0"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default height of every matte handed to the encoder
pub const DEFAULT_MATTE_HEIGHT: u32 = 320;

/// Execution device for the matting model
///
/// Passed explicitly to each worker's model instead of being picked up from
/// process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Cuda { device_id: i32 },
    TensorRt { device_id: i32 },
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (kind, id) = match lower.split_once(':') {
            Some((kind, id)) => (kind, Some(id)),
            None => (lower.as_str(), None),
        };
        let device_id = match id {
            Some(id) => id
                .parse::<i32>()
                .map_err(|_| ConfigError::Device(s.to_string()))?,
            None => 0,
        };

        match kind {
            "cpu" if id.is_none() => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda { device_id }),
            "tensorrt" | "trt" => Ok(Device::TensorRt { device_id }),
            _ => Err(ConfigError::Device(s.to_string())),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda { device_id } => write!(f, "cuda:{device_id}"),
            Device::TensorRt { device_id } => write!(f, "tensorrt:{device_id}"),
        }
    }
}

/// Settings consumed by the pipeline core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of long-lived matting workers
    pub worker_count: usize,

    /// Frames handed to the model per inference call
    pub batch_size: usize,

    /// Model identifier; for the ONNX provider this is the model file path
    pub model: String,

    /// Stop after this many frames
    pub frame_limit: Option<usize>,

    /// Decoded frames may run ahead of the workers by this many batches
    pub prefetch_batches: usize,

    /// Output frame rate; the source's detected rate is used when unset
    pub frame_rate: Option<u32>,

    /// Height of the matte stream handed to the encoder
    pub matte_height: u32,

    /// Completed batches allowed to wait for the sequencer (unbounded when unset)
    pub max_pending_batches: Option<usize>,

    /// Execution device for the model
    pub device: Device,

    /// Intra-op threads per model session
    pub intra_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            batch_size: 2,
            model: "u2net.onnx".to_string(),
            frame_limit: None,
            prefetch_batches: 4,
            frame_rate: None,
            matte_height: DEFAULT_MATTE_HEIGHT,
            max_pending_batches: None,
            device: Device::Cpu,
            intra_threads: 4,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a TOML file; missing keys take defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1"));
        }
        if self.prefetch_batches == 0 {
            return Err(ConfigError::Invalid("prefetch_batches must be at least 1"));
        }
        if self.batch_size.checked_mul(self.prefetch_batches).is_none() {
            return Err(ConfigError::Invalid(
                "batch_size × prefetch_batches overflows",
            ));
        }
        if self.matte_height == 0 {
            return Err(ConfigError::Invalid("matte_height must be at least 1"));
        }
        if self.frame_rate == Some(0) {
            return Err(ConfigError::Invalid("frame_rate must be positive"));
        }
        if self.max_pending_batches == Some(0) {
            return Err(ConfigError::Invalid("max_pending_batches must be at least 1"));
        }
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be at least 1"));
        }
        Ok(())
    }

    /// Upper bound on decoded frames resident in the frame buffer
    pub fn prefetch_bound(&self) -> usize {
        self.batch_size.saturating_mul(self.prefetch_batches)
    }

    /// Frames the pipeline will process for a source of `available` frames
    pub fn total_frames(&self, available: usize) -> usize {
        match self.frame_limit {
            Some(limit) => limit.min(available),
            None => available,
        }
    }
}
