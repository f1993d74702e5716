//! Round-robin partition of the frame range into worker batches
//!
//! Batch `n` covers frames `[n·batch_size, (n+1)·batch_size)` clipped to
//! `total_frames`, is owned by worker `n mod worker_count`, and is published
//! under sequence key `n + 1`. Walking the keys 1, 2, 3, … therefore visits
//! the frames in their original order.

use std::ops::Range;

/// One batch of consecutive frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based key the batch's mattes are published under
    pub sequence: usize,
    /// Worker that owns this batch
    pub worker: usize,
    /// Frame indices covered by the batch
    pub frames: Range<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAssignment {
    total_frames: usize,
    worker_count: usize,
    batch_size: usize,
}

impl BatchAssignment {
    /// # Panics
    ///
    /// Panics if `worker_count` or `batch_size` is zero.
    pub fn new(total_frames: usize, worker_count: usize, batch_size: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        assert!(batch_size > 0, "batch_size must be > 0");
        Self {
            total_frames,
            worker_count,
            batch_size,
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn total_batches(&self) -> usize {
        self.total_frames.div_ceil(self.batch_size)
    }

    /// Look up a batch by its sequence key
    pub fn batch(&self, sequence: usize) -> Option<Batch> {
        if sequence == 0 || sequence > self.total_batches() {
            return None;
        }
        let number = sequence - 1;
        let start = number * self.batch_size;
        Some(Batch {
            sequence,
            worker: number % self.worker_count,
            frames: start..(start + self.batch_size).min(self.total_frames),
        })
    }

    /// Batches owned by `worker`, in the order it processes them
    pub fn batches_for(&self, worker: usize) -> WorkerBatches {
        WorkerBatches {
            assignment: *self,
            worker,
            iteration: 0,
        }
    }
}

/// Iterator over one worker's batches
#[derive(Debug, Clone)]
pub struct WorkerBatches {
    assignment: BatchAssignment,
    worker: usize,
    iteration: usize,
}

impl Iterator for WorkerBatches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let a = &self.assignment;
        if self.worker >= a.worker_count {
            return None;
        }

        let start = a.batch_size * (self.worker + self.iteration * a.worker_count);
        if start >= a.total_frames {
            return None;
        }

        let batch = Batch {
            sequence: self.worker + 1 + self.iteration * a.worker_count,
            worker: self.worker,
            frames: start..(start + a.batch_size).min(a.total_frames),
        };
        self.iteration += 1;
        Some(batch)
    }
}
