//! Single consumer that restores frame order and feeds the sink

use super::assignment::BatchAssignment;
use super::control::{PipelineState, Shared};
use crate::error::PipelineError;
use crate::output::{EncoderParams, MatteSink, PixelFormat};
use std::time::Instant;

/// Log throughput every this many emitted frames
const PROGRESS_INTERVAL: usize = 30;

/// Drains the result buffer strictly in sequence order
///
/// Encoder parameters are negotiated lazily from the first matte, exactly
/// once. Every later matte must match them.
pub struct Sequencer<'a> {
    sink: &'a mut dyn MatteSink,
    total_frames: usize,
    total_batches: usize,
    frame_rate: u32,
    matte_height: u32,
    params: Option<EncoderParams>,
    next_sequence: usize,
    written: usize,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        sink: &'a mut dyn MatteSink,
        assignment: &BatchAssignment,
        frame_rate: u32,
        matte_height: u32,
    ) -> Self {
        Self {
            sink,
            total_frames: assignment.total_frames(),
            total_batches: assignment.total_batches(),
            frame_rate,
            matte_height,
            params: None,
            next_sequence: 1,
            written: 0,
        }
    }

    /// Parameters negotiated with the sink, once the first frame arrived
    pub fn params(&self) -> Option<EncoderParams> {
        self.params
    }

    pub(crate) fn run(&mut self, shared: &Shared) -> Result<usize, PipelineError> {
        shared.advance(PipelineState::Streaming);
        let started = Instant::now();

        while self.written < self.total_frames && self.next_sequence <= self.total_batches {
            let mattes = shared
                .results
                .take(self.next_sequence)
                .map_err(|_| PipelineError::Aborted)?;
            if self.next_sequence == self.total_batches {
                shared.advance(PipelineState::Draining);
            }

            for matte in &mattes {
                let params = self.negotiate(matte.width())?;
                let expected = params.frame_shape();
                if matte.shape() != expected {
                    return Err(PipelineError::MatteShape {
                        index: matte.index(),
                        expected,
                        found: matte.shape(),
                    });
                }

                self.sink
                    .write_frame(matte)
                    .map_err(|source| PipelineError::EncoderWrite {
                        frame: matte.index(),
                        source,
                    })?;
                self.written += 1;

                if self.written % PROGRESS_INTERVAL == 0 {
                    let fps = self.written as f64 / started.elapsed().as_secs_f64().max(1e-9);
                    tracing::info!(
                        "Frame {}/{}: fps={:.1}",
                        self.written,
                        self.total_frames,
                        fps
                    );
                }
            }

            self.next_sequence += 1;
        }

        Ok(self.written)
    }

    fn negotiate(&mut self, width: u32) -> Result<EncoderParams, PipelineError> {
        if let Some(params) = self.params {
            return Ok(params);
        }

        let params = EncoderParams {
            width,
            height: self.matte_height,
            pixel_format: PixelFormat::Gray,
            frame_rate: self.frame_rate,
        };
        self.sink
            .begin(&params)
            .map_err(PipelineError::EncoderSpawn)?;
        self.params = Some(params);
        Ok(params)
    }
}
