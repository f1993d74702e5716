//! Batched, multi-worker video matting
//!
//! Decodes a video, computes a foreground matte for every frame with an ONNX
//! segmentation model on several workers at once, and streams the mattes to
//! an encoder in the original frame order.

pub mod compose;
pub mod config;
pub mod error;
pub mod frame;
pub mod matting;
pub mod output;
pub mod pipeline;
pub mod source;

pub use config::{Device, PipelineConfig};
pub use error::{ConfigError, PipelineError};
pub use frame::{Frame, FrameShape};
pub use pipeline::{matte_key, CancelHandle, Pipeline, PipelineReport, PipelineState};
