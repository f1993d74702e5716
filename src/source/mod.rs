mod ffmpeg;

pub use ffmpeg::{parse_frame_rate, FfmpegDecoder, ProbeOutput};

use crate::frame::FrameShape;
use anyhow::Result;

/// What the decoder knows about a source before the first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    /// Decodable frames in the first video stream
    pub frame_count: usize,
    /// Detected frame rate, rounded up to whole frames per second
    pub frame_rate: u32,
    /// Shape of every decoded frame
    pub shape: FrameShape,
}

/// Trait for sequential video decoders
///
/// Frames come out in presentation order. The sequence is finite and cannot
/// be restarted.
pub trait VideoDecoder: Send {
    fn info(&self) -> VideoInfo;

    /// Decode the next frame's samples, or `None` once the stream is exhausted
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}
