//! Frame source: decodes frames in order into the frame buffer

use super::control::Shared;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::source::VideoDecoder;
use anyhow::anyhow;

/// Decode exactly `total_frames` frames into the frame buffer
///
/// Each insert waits for room below the prefetch bound, so the decoder never
/// runs further ahead of the workers than that. Frames past `total_frames`
/// are never requested from the decoder.
pub(crate) fn run(
    decoder: &mut dyn VideoDecoder,
    total_frames: usize,
    shared: &Shared,
) -> Result<usize, PipelineError> {
    tracing::info!("Frame source online ({} frames)", total_frames);
    let shape = decoder.info().shape;

    for index in 0..total_frames {
        if shared.is_stopped() {
            return Err(PipelineError::Aborted);
        }

        let data = decoder
            .next_frame()
            .map_err(|source| PipelineError::Decode { index, source })?
            .ok_or(PipelineError::SourceTruncated {
                expected: total_frames,
                decoded: index,
            })?;

        let frame = Frame::new(index, shape, data).map_err(|e| PipelineError::Decode {
            index,
            source: anyhow!(e),
        })?;

        shared
            .frames
            .insert(frame)
            .map_err(|_| PipelineError::Aborted)?;
    }

    tracing::debug!("Frame source finished after {} frames", total_frames);
    Ok(total_frames)
}
