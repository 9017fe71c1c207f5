// src/basket.rs
//
// Dynamic work partitioner for one energy evaluation.
//
// A single shared offset behind one mutex hands out contiguous half-open
// index ranges. The lock is held only for the offset arithmetic, never
// across term evaluation. Every index in [0, total) is handed out exactly
// once; once exhausted, every claim returns the empty range total..total.
//
// In particular index 0 belongs to exactly one claimed job, which is what
// lets the engine run the one-shot fill handoff without further locking.

use std::ops::Range;
use std::sync::{Mutex, PoisonError};

use tracing::trace;

#[derive(Debug, Default)]
struct Cursor {
    next: usize,
    total: usize,
}

#[derive(Debug, Default)]
pub struct JobBasket {
    cursor: Mutex<Cursor>,
    block_size: usize,
    thread_count: usize,
}

impl JobBasket {
    /// A basket covering `total` cells for `thread_count` workers.
    ///
    /// Jobs are sized so that `block_size * thread_count * jobs_per_thread`
    /// covers `total`, rounded up to a multiple of `granule` (floor 1).
    pub fn new(total: usize, thread_count: usize, jobs_per_thread: usize, granule: usize) -> Self {
        let mut basket = Self::default();
        basket.initialize(total, thread_count, jobs_per_thread, granule);
        basket
    }

    /// Reset for a new pass. Takes `&mut self`, so it cannot race claims.
    pub fn initialize(
        &mut self,
        total: usize,
        thread_count: usize,
        jobs_per_thread: usize,
        granule: usize,
    ) {
        let threads = thread_count.max(1);
        let slots = threads.saturating_mul(jobs_per_thread.max(1));
        let granule = granule.max(1);

        let mut block = total.div_ceil(slots).max(1);
        if block % granule != 0 {
            block += granule - block % granule;
        }

        self.block_size = block;
        self.thread_count = threads;
        let cursor = self.cursor.get_mut().unwrap_or_else(PoisonError::into_inner);
        cursor.next = 0;
        cursor.total = total;
    }

    /// Claim the next job. Safe from any thread; an empty range means the
    /// basket is exhausted.
    pub fn claim(&self, thread_id: usize) -> Range<usize> {
        debug_assert!(thread_id < self.thread_count);
        let job = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let start = cursor.next;
            let stop = start.saturating_add(self.block_size).min(cursor.total);
            cursor.next = stop;
            start..stop
        };
        trace!(thread_id, start = job.start, stop = job.end, "claimed job");
        job
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of non-empty jobs a full drain produces.
    pub fn job_count(&self) -> usize {
        let total = self
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total;
        total.div_ceil(self.block_size)
    }
}
