use super::{EncoderParams, MatteSink};
use crate::frame::Frame;
use anyhow::{bail, Context, Result};
use std::io::Write;

/// Writes the raw matte byte stream to any writer
///
/// Useful for piping mattes into other tools, and as an in-memory sink.
pub struct RawSink<W: Write + Send> {
    writer: W,
    params: Option<EncoderParams>,
    frames: usize,
}

impl<W: Write + Send> RawSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            params: None,
            frames: 0,
        }
    }

    /// Parameters the stream was opened with
    pub fn params(&self) -> Option<EncoderParams> {
        self.params
    }

    /// Frames written so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> MatteSink for RawSink<W> {
    fn begin(&mut self, params: &EncoderParams) -> Result<()> {
        if self.params.is_some() {
            bail!("Raw stream already started");
        }
        self.params = Some(*params);
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.params.is_none() {
            bail!("Raw stream is not started");
        }
        self.writer
            .write_all(frame.as_bytes())
            .context("Failed to write raw frame")?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<String>> {
        self.writer.flush().context("Failed to flush raw stream")?;
        Ok(None)
    }
}
