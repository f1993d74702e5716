//! Pipeline lifecycle state, failure recording and cancellation

use super::frame_buffer::FrameBuffer;
use super::result_buffer::ResultBuffer;
use crate::error::PipelineError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Process-wide pipeline state
///
/// `Starting → Streaming → Draining → Done`, or `Fatal` from any state.
/// `Fatal` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    /// Units are being spawned
    Starting = 0,
    /// The sequencer is draining results
    Streaming = 1,
    /// The final sequence key has been taken
    Draining = 2,
    /// All units joined and the sink closed
    Done = 3,
    /// A unit failed or the run was cancelled
    Fatal = 4,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Starting,
            1 => PipelineState::Streaming,
            2 => PipelineState::Draining,
            3 => PipelineState::Done,
            _ => PipelineState::Fatal,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Starting => "STARTING",
            PipelineState::Streaming => "STREAMING",
            PipelineState::Draining => "DRAINING",
            PipelineState::Done => "DONE",
            PipelineState::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// State shared by every unit of one pipeline run
pub(crate) struct Shared {
    pub frames: FrameBuffer,
    pub results: ResultBuffer,
    state: AtomicU8,
    failure: Mutex<Option<PipelineError>>,
}

impl Shared {
    pub fn new(frames: FrameBuffer, results: ResultBuffer) -> Self {
        Self {
            frames,
            results,
            state: AtomicU8::new(PipelineState::Starting as u8),
            failure: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move forward to `next` unless the run already failed
    pub fn advance(&self, next: PipelineState) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == PipelineState::Fatal as u8 || current >= next as u8 {
                return;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::debug!(
                        "Pipeline {} -> {}",
                        PipelineState::from_u8(current),
                        next
                    );
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PipelineState::Fatal
    }

    /// Record a failure, turn the pipeline FATAL and wake every blocked unit
    ///
    /// Only the first failure is kept; later ones are consequences of it.
    pub fn abort(&self, error: PipelineError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                match &error {
                    PipelineError::Aborted => {}
                    PipelineError::Cancelled => tracing::warn!("Pipeline cancelled"),
                    other => tracing::error!("Pipeline failed: {}", other),
                }
                *failure = Some(error);
            }
        }

        self.state.store(PipelineState::Fatal as u8, Ordering::Release);
        self.frames.close();
        self.results.close();
    }

    pub fn take_failure(&self) -> Option<PipelineError> {
        self.failure.lock().take()
    }

    /// Guard that aborts the run if `unit` unwinds while holding it
    pub fn unit_guard(&self, unit: &str) -> UnitGuard<'_> {
        UnitGuard {
            shared: self,
            unit: unit.to_string(),
        }
    }
}

/// Turns a panicking unit into a FATAL pipeline
///
/// Without it the remaining units would wait forever on keys the dead unit
/// was supposed to provide.
pub(crate) struct UnitGuard<'a> {
    shared: &'a Shared,
    unit: String,
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.shared.abort(PipelineError::UnitPanicked {
                unit: std::mem::take(&mut self.unit),
            });
        }
    }
}

/// Stops a running pipeline from another thread
///
/// The run returns [`PipelineError::Cancelled`] once every unit has stopped
/// and the sink has been released.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn cancel(&self) {
        self.shared.abort(PipelineError::Cancelled);
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }
}
