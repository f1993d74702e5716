//! Completed batches waiting for the sequencer

use super::frame_buffer::Closed;
use crate::frame::Frame;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;

struct State {
    batches: HashMap<usize, Vec<Frame>>,
    /// Key the sequencer will take next
    next: usize,
    peak: usize,
    closed: bool,
}

/// Matte batches keyed by their 1-based sequence number
///
/// Each key is published once, by its owning worker, and taken once, by the
/// sequencer, in ascending order. With a `window`, a key is only accepted
/// while it is less than `window` keys ahead of the one the sequencer waits
/// for; that key itself is always accepted, so the window cannot stall the
/// pipeline.
pub struct ResultBuffer {
    window: Option<usize>,
    state: Mutex<State>,
    changed: Condvar,
}

impl ResultBuffer {
    pub fn new(window: Option<usize>) -> Self {
        Self {
            window: window.map(|w| w.max(1)),
            state: Mutex::new(State {
                batches: HashMap::new(),
                next: 1,
                peak: 0,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn admits(&self, state: &State, sequence: usize) -> bool {
        match self.window {
            Some(window) => sequence < state.next + window,
            None => true,
        }
    }

    pub fn publish(&self, sequence: usize, mattes: Vec<Frame>) -> Result<(), Closed> {
        let mut state = self.state.lock();
        while !state.closed && !self.admits(&state, sequence) {
            self.changed.wait(&mut state);
        }
        if state.closed {
            return Err(Closed);
        }

        state.batches.insert(sequence, mattes);
        state.peak = state.peak.max(state.batches.len());
        drop(state);

        self.changed.notify_all();
        Ok(())
    }

    /// Block until `sequence` is published, then remove and return it
    pub fn take(&self, sequence: usize) -> Result<Vec<Frame>, Closed> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(Closed);
            }
            if let Some(mattes) = state.batches.remove(&sequence) {
                state.next = state.next.max(sequence + 1);
                drop(state);
                self.changed.notify_all();
                return Ok(mattes);
            }
            self.changed.wait(&mut state);
        }
    }

    /// Batches published but not yet taken
    pub fn len(&self) -> usize {
        self.state.lock().batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest number of batches ever waiting at once
    pub fn peak(&self) -> usize {
        self.state.lock().peak
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }
}
