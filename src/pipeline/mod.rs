//! Concurrent matting pipeline
//!
//! ```text
//! ┌─────────────┐        ┌─────────────┐  worker 0..N  ┌──────────────┐        ┌───────────┐
//! │ FrameSource │──────► │ FrameBuffer │ ────────────► │ ResultBuffer │──────► │ Sequencer │──► sink
//! │  (decoder)  │ insert │  (bounded)  │  wait/remove  │ (by sequence)│  take  │ (ordered) │
//! └─────────────┘        └─────────────┘               └──────────────┘        └───────────┘
//! ```
//!
//! Decode, batched inference and encode overlap, so wall-clock time tends
//! towards the slowest stage rather than the sum of all three.
//!
//! # Units
//!
//! - One frame source thread decoding into the [`FrameBuffer`]; it blocks
//!   while `batch_size × prefetch_batches` frames are resident.
//! - `worker_count` matting threads, each owning a round-robin slice of the
//!   batches ([`BatchAssignment`]) and its own model instance.
//! - The [`Sequencer`] on the calling thread, taking sequence keys 1, 2, 3, …
//!   and streaming mattes to the [`MatteSink`].
//!
//! # Shutdown
//!
//! The first failing unit records its error, turns the pipeline FATAL and
//! closes both buffers, which wakes every blocked unit. All threads are
//! joined before `run` returns and the sink is aborted; a failed run never
//! leaves a valid-looking output behind. A panicking unit takes the same
//! path and is reported as [`PipelineError::UnitPanicked`], as does
//! [`CancelHandle::cancel`] with [`PipelineError::Cancelled`].

mod assignment;
mod control;
mod frame_buffer;
mod producer;
mod result_buffer;
mod sequencer;
mod worker;

pub use assignment::{Batch, BatchAssignment, WorkerBatches};
pub use control::{CancelHandle, PipelineState};
pub use frame_buffer::{Closed, FrameBuffer};
pub use result_buffer::ResultBuffer;
pub use sequencer::Sequencer;
pub use worker::WorkerStats;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::matting::{self, ModelProvider};
use crate::output::{EncoderParams, FfmpegSink, MatteSink};
use crate::source::{FfmpegDecoder, VideoDecoder};
use control::Shared;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Frames the run was asked to process
    pub total_frames: usize,
    pub batches: usize,
    /// Frames handed to the sink
    pub frames_written: usize,
    pub frame_rate: u32,
    /// Parameters negotiated with the sink
    pub encoder: Option<EncoderParams>,
    pub elapsed: Duration,
    /// Highest number of decoded frames resident at once
    pub peak_buffered_frames: usize,
    /// Highest number of completed batches waiting for the sequencer at once
    pub peak_pending_batches: usize,
    pub workers: Vec<WorkerStats>,
    /// Diagnostics the sink emitted without failing
    pub warnings: Option<String>,
}

/// One run of the matting pipeline
pub struct Pipeline {
    config: PipelineConfig,
    shared: Arc<Shared>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let shared = Shared::new(
            FrameBuffer::new(config.prefetch_bound()),
            ResultBuffer::new(config.max_pending_batches),
        );

        Ok(Self {
            config,
            shared: Arc::new(shared),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// Handle that stops this run from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.shared))
    }

    /// Run every unit to completion
    ///
    /// On failure the sink is aborted and the first error is returned.
    pub fn run(
        self,
        decoder: &mut dyn VideoDecoder,
        models: &dyn ModelProvider,
        sink: &mut dyn MatteSink,
    ) -> Result<PipelineReport, PipelineError> {
        match self.execute(decoder, models, sink) {
            Ok(report) => Ok(report),
            Err(error) => {
                self.shared.abort(error);
                sink.abort();
                Err(self.shared.take_failure().unwrap_or(PipelineError::Aborted))
            }
        }
    }

    fn execute(
        &self,
        decoder: &mut dyn VideoDecoder,
        models: &dyn ModelProvider,
        sink: &mut dyn MatteSink,
    ) -> Result<PipelineReport, PipelineError> {
        let shared: &Shared = &self.shared;
        if shared.is_stopped() {
            return Err(shared.take_failure().unwrap_or(PipelineError::Aborted));
        }

        let info = decoder.info();
        let total_frames = self.config.total_frames(info.frame_count);
        if total_frames == 0 {
            return Err(PipelineError::NoFrames);
        }

        let frame_rate = match self.config.frame_rate {
            Some(rate) => rate,
            None => {
                tracing::info!(
                    "Frame rate detected: {} (if this looks wrong, override the frame rate)",
                    info.frame_rate
                );
                info.frame_rate
            }
        };
        tracing::info!("Frame rate: {} Total frames: {}", frame_rate, total_frames);

        let assignment = BatchAssignment::new(
            total_frames,
            self.config.worker_count,
            self.config.batch_size,
        );
        let started = Instant::now();

        let (frames_written, encoder, workers) = thread::scope(|scope| {
            let producer = thread::Builder::new()
                .name("frame-source".to_string())
                .spawn_scoped(scope, move || {
                    let _guard = shared.unit_guard("frame-source");
                    if let Err(e) = producer::run(decoder, total_frames, shared) {
                        shared.abort(e);
                    }
                });
            let producer = match producer {
                Ok(handle) => Some(handle),
                Err(source) => {
                    shared.abort(PipelineError::UnitSpawn {
                        unit: "frame-source".to_string(),
                        source,
                    });
                    None
                }
            };

            let mut handles = Vec::with_capacity(assignment.worker_count());
            for id in 0..assignment.worker_count() {
                if shared.is_stopped() {
                    break;
                }
                let unit = format!("matte-worker-{id}");
                let guard_name = unit.clone();
                let spawned = thread::Builder::new()
                    .name(unit.clone())
                    .spawn_scoped(scope, move || {
                        let _guard = shared.unit_guard(&guard_name);
                        match worker::run(id, assignment, models, shared) {
                            Ok(stats) => Some(stats),
                            Err(e) => {
                                shared.abort(e);
                                None
                            }
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push((unit, handle)),
                    Err(source) => {
                        shared.abort(PipelineError::UnitSpawn { unit, source });
                        break;
                    }
                }
            }

            let mut sequencer = Sequencer::new(
                &mut *sink,
                &assignment,
                frame_rate,
                self.config.matte_height,
            );
            let written = if shared.is_stopped() {
                0
            } else {
                // Sink panics surface as a failed unit
                match panic::catch_unwind(AssertUnwindSafe(|| sequencer.run(shared))) {
                    Ok(Ok(written)) => written,
                    Ok(Err(e)) => {
                        shared.abort(e);
                        0
                    }
                    Err(_) => {
                        shared.abort(PipelineError::UnitPanicked {
                            unit: "sequencer".to_string(),
                        });
                        0
                    }
                }
            };
            let encoder = sequencer.params();

            if let Some(handle) = producer {
                if handle.join().is_err() {
                    shared.abort(PipelineError::UnitPanicked {
                        unit: "frame-source".to_string(),
                    });
                }
            }

            let mut workers = Vec::with_capacity(handles.len());
            for (unit, handle) in handles {
                match handle.join() {
                    Ok(Some(stats)) => workers.push(stats),
                    Ok(None) => {}
                    Err(_) => shared.abort(PipelineError::UnitPanicked { unit }),
                }
            }

            (written, encoder, workers)
        });

        if let Some(error) = shared.take_failure() {
            return Err(error);
        }

        let warnings = sink.finish().map_err(PipelineError::EncoderFailed)?;
        shared.advance(PipelineState::Done);

        let elapsed = started.elapsed();
        tracing::info!(
            "Finished all frames ({}) in {:.1}s, {:.1} fps",
            frames_written,
            elapsed.as_secs_f64(),
            frames_written as f64 / elapsed.as_secs_f64().max(1e-9)
        );

        Ok(PipelineReport {
            total_frames,
            batches: assignment.total_batches(),
            frames_written,
            frame_rate,
            encoder,
            elapsed,
            peak_buffered_frames: shared.frames.peak(),
            peak_pending_batches: shared.results.peak(),
            workers,
            warnings,
        })
    }
}

/// Compute the matte video of `input` into `output`
///
/// Decodes with ffmpeg, runs the configured ONNX model on every worker and
/// encodes the gray matte stream with ffmpeg.
pub fn matte_key(
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
) -> Result<PipelineReport, PipelineError> {
    let pipeline = Pipeline::new(config.clone())?;
    let mut decoder = FfmpegDecoder::open(input).map_err(PipelineError::Probe)?;
    let provider = matting::create_default_provider(config);
    let mut sink = FfmpegSink::new(output);

    pipeline.run(&mut decoder, provider.as_ref(), &mut sink)
}
