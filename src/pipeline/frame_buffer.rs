//! Bounded, indexed holding area between the decoder and the workers

use crate::frame::Frame;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

/// Returned by blocking buffer operations once the pipeline is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer closed")]
pub struct Closed;

#[derive(Default)]
struct State {
    frames: HashMap<usize, Arc<Frame>>,
    peak: usize,
    closed: bool,
}

/// Decoded frames keyed by index, at most `bound` resident at once
///
/// The producer is the only inserter. Each frame is removed exactly once, by
/// the worker whose batch contains it.
pub struct FrameBuffer {
    bound: usize,
    state: Mutex<State>,
    changed: Condvar,
}

impl FrameBuffer {
    /// # Panics
    ///
    /// Panics if `bound` is zero.
    pub fn new(bound: usize) -> Self {
        assert!(bound > 0, "frame buffer bound must be > 0");
        Self {
            bound,
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        }
    }

    /// Insert a frame, first blocking until fewer than `bound` are resident
    pub fn insert(&self, frame: Frame) -> Result<(), Closed> {
        let mut state = self.state.lock();
        while state.frames.len() >= self.bound && !state.closed {
            self.changed.wait(&mut state);
        }
        if state.closed {
            return Err(Closed);
        }

        state.frames.insert(frame.index(), Arc::new(frame));
        state.peak = state.peak.max(state.frames.len());
        drop(state);

        self.changed.notify_all();
        Ok(())
    }

    /// Block until every index in `indices` is resident, then borrow them
    ///
    /// The frames stay in the buffer; call [`FrameBuffer::remove`] once done.
    pub fn wait_for(&self, indices: Range<usize>) -> Result<Vec<Arc<Frame>>, Closed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Closed);
            }
            if indices.clone().all(|i| state.frames.contains_key(&i)) {
                return Ok(indices
                    .clone()
                    .filter_map(|i| state.frames.get(&i).cloned())
                    .collect());
            }
            self.changed.wait(&mut state);
        }
    }

    /// Drop consumed frames, making room for the producer
    pub fn remove(&self, indices: Range<usize>) -> usize {
        let mut state = self.state.lock();
        let removed = indices
            .filter(|i| state.frames.remove(i).is_some())
            .count();
        drop(state);

        self.changed.notify_all();
        removed
    }

    /// Frames currently resident
    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest number of frames ever resident at once
    pub fn peak(&self) -> usize {
        self.state.lock().peak
    }

    /// Wake every blocked caller with [`Closed`] and refuse further inserts
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }
}
