mod ffmpeg;
mod raw;

pub use ffmpeg::FfmpegSink;
pub use raw::RawSink;

use crate::frame::{Frame, FrameShape};
use anyhow::Result;
use std::fmt;

/// Pixel layout of the raw stream handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte per pixel
    Gray,
}

impl PixelFormat {
    /// Name understood by ffmpeg's `-pix_fmt`
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Gray => "gray",
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            PixelFormat::Gray => 1,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

/// Stream parameters negotiated once from the first matte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: u32,
}

impl EncoderParams {
    /// Shape every frame written under these parameters must have
    pub fn frame_shape(&self) -> FrameShape {
        FrameShape::new(self.height, self.width, self.pixel_format.channels())
    }
}

/// Trait for matte stream destinations
pub trait MatteSink: Send {
    /// Open the stream; called exactly once, before the first frame
    fn begin(&mut self, params: &EncoderParams) -> Result<()>;

    /// Append one frame's raw bytes
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Close the stream cleanly
    ///
    /// Returns diagnostic text the destination emitted while running, if any.
    fn finish(&mut self) -> Result<Option<String>>;

    /// Release the destination after a failed run; the output is not valid
    fn abort(&mut self) {}
}
