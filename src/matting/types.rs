use crate::frame::{Frame, FrameShape};
use anyhow::Result;
use std::sync::Arc;

/// Tensor shape a model instance is specialised for
///
/// Every call after [`MattingModel::prepare`] carries exactly `batch` frames
/// of shape `frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchShape {
    pub batch: usize,
    pub frame: FrameShape,
}

/// Trait for matting models
/// Allows swapping between different backends (U²-Net, test doubles, etc.)
pub trait MattingModel: Send {
    /// One-time specialisation for the batch shape of all later calls
    ///
    /// Called once per worker before its first batch.
    fn prepare(&mut self, _shape: BatchShape) -> Result<()> {
        // Default implementation: nothing to compile
        Ok(())
    }

    /// Compute one single-channel matte per input frame
    ///
    /// # Returns
    /// * Mattes in input order, each carrying the index of its source frame
    fn matte(&mut self, frames: &[Arc<Frame>]) -> Result<Vec<Frame>>;
}

/// Builds one model instance per worker
///
/// Each worker owns its model for its whole lifetime, so providers are
/// called from the worker's own thread.
pub trait ModelProvider: Send + Sync {
    fn load(&self, worker: usize) -> Result<Box<dyn MattingModel>>;
}

impl<F> ModelProvider for F
where
    F: Fn(usize) -> Result<Box<dyn MattingModel>> + Send + Sync,
{
    fn load(&self, worker: usize) -> Result<Box<dyn MattingModel>> {
        self(worker)
    }
}
