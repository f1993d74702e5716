#![allow(dead_code)]

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vidmatte::frame::{Frame, FrameShape};
use vidmatte::matting::{BatchShape, MattingModel, ModelProvider};
use vidmatte::output::{EncoderParams, MatteSink};
use vidmatte::source::{VideoDecoder, VideoInfo};
use vidmatte::CancelHandle;

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 3;

/// Gray level every matte of frame `index` is filled with
pub fn level(index: usize) -> u8 {
    (index * 7 % 251) as u8
}

/// Decoder yielding frames whose pixels all encode the frame index
pub struct SyntheticDecoder {
    frame_count: usize,
    frame_rate: u32,
    /// Frames actually available; shorter than `frame_count` simulates a truncated file
    available: usize,
    fail_at: Option<usize>,
    next: usize,
    pulled: Arc<AtomicUsize>,
}

impl SyntheticDecoder {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            frame_rate: 25,
            available: frame_count,
            fail_at: None,
            next: 0,
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn truncated_at(mut self, available: usize) -> Self {
        self.available = available;
        self
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Counter of `next_frame` calls, readable after the decoder is borrowed
    pub fn pulled(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pulled)
    }
}

impl VideoDecoder for SyntheticDecoder {
    fn info(&self) -> VideoInfo {
        VideoInfo {
            frame_count: self.frame_count,
            frame_rate: self.frame_rate,
            shape: FrameShape::rgb(HEIGHT, WIDTH),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        self.pulled.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(self.next) {
            bail!("corrupt packet");
        }
        if self.next >= self.available {
            return Ok(None);
        }

        let bytes = vec![level(self.next); FrameShape::rgb(HEIGHT, WIDTH).byte_len()];
        self.next += 1;
        Ok(Some(bytes))
    }
}

/// Deterministic model: each matte is filled with its frame's first sample
pub struct FillModel {
    matte_height: u32,
    fail_on_frame: Option<usize>,
    panic_on_frame: Option<usize>,
    cancel_on_frame: Option<(usize, CancelHandle)>,
    delay: Duration,
    prepared: Option<BatchShape>,
}

impl MattingModel for FillModel {
    fn prepare(&mut self, shape: BatchShape) -> Result<()> {
        if self.prepared.is_some() {
            bail!("prepared twice");
        }
        self.prepared = Some(shape);
        Ok(())
    }

    fn matte(&mut self, frames: &[Arc<Frame>]) -> Result<Vec<Frame>> {
        let Some(prepared) = self.prepared else {
            bail!("matte before prepare");
        };
        if frames.len() != prepared.batch {
            bail!("batch of {} for a model prepared for {}", frames.len(), prepared.batch);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let mut mattes = Vec::with_capacity(frames.len());
        for frame in frames {
            if self.fail_on_frame == Some(frame.index()) {
                bail!("inference failed on frame {}", frame.index());
            }
            if self.panic_on_frame == Some(frame.index()) {
                panic!("runtime crashed on frame {}", frame.index());
            }
            if let Some((index, handle)) = &self.cancel_on_frame {
                if *index == frame.index() {
                    handle.cancel();
                }
            }
            let shape = FrameShape::gray(self.matte_height, frame.width());
            let fill = frame.as_bytes()[0];
            mattes.push(Frame::new(frame.index(), shape, vec![fill; shape.byte_len()])?);
        }
        Ok(mattes)
    }
}

/// Provider handing every worker its own [`FillModel`]
pub struct FillProvider {
    pub matte_height: u32,
    pub fail_on_frame: Option<usize>,
    pub panic_on_frame: Option<usize>,
    pub fail_load_worker: Option<usize>,
    pub cancel_on_frame: Option<(usize, CancelHandle)>,
    pub delay: Duration,
    pub loads: AtomicUsize,
}

impl FillProvider {
    pub fn new(matte_height: u32) -> Self {
        Self {
            matte_height,
            fail_on_frame: None,
            panic_on_frame: None,
            fail_load_worker: None,
            cancel_on_frame: None,
            delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
        }
    }
}

impl ModelProvider for FillProvider {
    fn load(&self, worker: usize) -> Result<Box<dyn MattingModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load_worker == Some(worker) {
            bail!("no device for worker {}", worker);
        }
        Ok(Box::new(FillModel {
            matte_height: self.matte_height,
            fail_on_frame: self.fail_on_frame,
            panic_on_frame: self.panic_on_frame,
            cancel_on_frame: self.cancel_on_frame.clone(),
            delay: self.delay,
            prepared: None,
        }))
    }
}

/// In-memory sink recording everything the pipeline did to it
#[derive(Default)]
pub struct RecordingSink {
    pub params: Option<EncoderParams>,
    pub begins: usize,
    pub indices: Vec<usize>,
    pub bytes: Vec<u8>,
    pub finished: bool,
    pub aborted: bool,
    /// Panic on this write instead of accepting it
    pub panic_on_write: Option<usize>,
}

impl MatteSink for RecordingSink {
    fn begin(&mut self, params: &EncoderParams) -> Result<()> {
        self.begins += 1;
        self.params = Some(*params);
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.panic_on_write == Some(self.indices.len()) {
            panic!("encoder pipe exploded");
        }
        self.indices.push(frame.index());
        self.bytes.extend_from_slice(frame.as_bytes());
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<String>> {
        self.finished = true;
        Ok(None)
    }

    fn abort(&mut self) {
        self.aborted = true;
        self.bytes.clear();
    }
}
