//! Matting workers
//!
//! Each worker owns its own model and a fixed, disjoint slice of the batch
//! sequence (see [`BatchAssignment`]). It waits for all frames of its next
//! batch, runs the model on the whole batch, publishes the mattes under the
//! batch's sequence key and only then frees the frames.

use super::assignment::BatchAssignment;
use super::control::Shared;
use crate::error::PipelineError;
use crate::frame::{Frame, FrameShape};
use crate::matting::{BatchShape, MattingModel, ModelProvider};
use anyhow::anyhow;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub batches: usize,
    pub frames: usize,
    pub matte_time: Duration,
}

pub(crate) fn run(
    worker: usize,
    assignment: BatchAssignment,
    provider: &dyn ModelProvider,
    shared: &Shared,
) -> Result<WorkerStats, PipelineError> {
    let mut stats = WorkerStats::default();
    let mut batches = assignment.batches_for(worker).peekable();
    if batches.peek().is_none() {
        tracing::debug!("Worker {} has no batches", worker);
        return Ok(stats);
    }

    let mut model = provider
        .load(worker)
        .map_err(|source| PipelineError::ModelLoad { worker, source })?;
    tracing::info!("Worker {} online", worker);

    let mut specialised: Option<FrameShape> = None;

    for batch in batches {
        if shared.is_stopped() {
            return Err(PipelineError::Aborted);
        }
        let _span =
            tracing::debug_span!("matte_batch", worker, sequence = batch.sequence).entered();

        let frames = shared
            .frames
            .wait_for(batch.frames.clone())
            .map_err(|_| PipelineError::Aborted)?;
        let Some(first) = frames.first() else {
            continue;
        };

        let expected = match specialised {
            Some(shape) => shape,
            None => {
                let shape = BatchShape {
                    batch: assignment.batch_size(),
                    frame: first.shape(),
                };
                model
                    .prepare(shape)
                    .map_err(|source| PipelineError::Matting {
                        sequence: batch.sequence,
                        source,
                    })?;
                specialised = Some(shape.frame);
                shape.frame
            }
        };
        if let Some(frame) = frames.iter().find(|f| f.shape() != expected) {
            return Err(PipelineError::ShapeChanged {
                worker,
                expected,
                found: frame.shape(),
            });
        }

        let started = Instant::now();
        let mattes = matte_batch(
            model.as_mut(),
            &frames,
            assignment.batch_size(),
            batch.sequence,
        )?;
        stats.matte_time += started.elapsed();

        shared
            .results
            .publish(batch.sequence, mattes)
            .map_err(|_| PipelineError::Aborted)?;
        shared.frames.remove(batch.frames.clone());

        stats.batches += 1;
        stats.frames += frames.len();
    }

    tracing::debug!(
        "Worker {} finished: {} batches, {} frames, {:.1}ms per batch",
        worker,
        stats.batches,
        stats.frames,
        stats.matte_time.as_secs_f64() * 1000.0 / stats.batches.max(1) as f64
    );
    Ok(stats)
}

/// Run the model on one batch, keeping the tensor shape fixed
///
/// A short trailing batch is padded by repeating its last frame; mattes for
/// the padding are discarded.
fn matte_batch(
    model: &mut dyn MattingModel,
    frames: &[Arc<Frame>],
    batch_size: usize,
    sequence: usize,
) -> Result<Vec<Frame>, PipelineError> {
    let mut input = frames.to_vec();
    if let Some(last) = frames.last() {
        while input.len() < batch_size {
            input.push(Arc::clone(last));
        }
    }

    let mut mattes = model
        .matte(&input)
        .map_err(|source| PipelineError::Matting { sequence, source })?;
    if mattes.len() != input.len() {
        return Err(PipelineError::MatteCount {
            sequence,
            expected: input.len(),
            found: mattes.len(),
        });
    }
    mattes.truncate(frames.len());

    if let Some((matte, frame)) = mattes
        .iter()
        .zip(frames)
        .find(|(matte, frame)| matte.index() != frame.index())
    {
        return Err(PipelineError::Matting {
            sequence,
            source: anyhow!(
                "matte for frame {} returned in place of frame {}",
                matte.index(),
                frame.index()
            ),
        });
    }

    Ok(mattes)
}
