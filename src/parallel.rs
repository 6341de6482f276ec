//! Work splitting over a bounded pool of worker threads.
//!
//! Jobs are divided into contiguous chunks, one per worker, and run on a
//! dedicated rayon pool. Results are reduced in chunk order so a job gives the
//! same answer for a given seed whatever the scheduling. All long-running work
//! observes a shared [CancellationToken].

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{RadiationError, Result};

/// A flag shared between a job and whoever may want to stop it.
///
/// Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that all jobs observing this token stop at their next check.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns [RadiationError::Cancelled] once cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RadiationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Splits `0..total` into at most `chunks` contiguous ranges of near-equal length.
///
/// The first `total % chunks` ranges hold one element more than the rest.
pub fn partition(total: usize, chunks: usize) -> Vec<Range<usize>> {
    let chunks = chunks.max(1).min(total.max(1));
    let base = total / chunks;
    let extra = total % chunks;
    let mut start = 0;
    (0..chunks)
        .map(|i| {
            let len = base + if i < extra { 1 } else { 0 };
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// Derives an independent seed for chunk `index` from a base seed (splitmix64).
pub fn chunk_seed(base: u64, index: usize) -> u64 {
    let mut z = base.wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Runs jobs on a fixed number of worker threads.
pub struct ParallelExecutor {
    pool: ThreadPool,
    threads: usize,
}

impl ParallelExecutor {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(RadiationError::invalid("threads", "at least one worker thread is required"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("thomson-worker-{}", i))
            .build()?;
        debug!("Started worker pool with {} threads", threads);
        Ok(ParallelExecutor { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Splits `0..total` over the workers and runs `job` once per chunk.
    ///
    /// The job receives the chunk index and its range. Results come back in chunk
    /// order. Cancellation is checked before each chunk starts; jobs are expected to
    /// check the token themselves while running.
    pub fn run_chunks<T, F>(&self, total: usize, token: &CancellationToken, job: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize, Range<usize>) -> Result<T> + Sync,
    {
        let ranges = partition(total, self.threads);
        self.pool.install(|| {
            ranges
                .into_par_iter()
                .enumerate()
                .map(|(index, range)| {
                    token.check()?;
                    job(index, range)
                })
                .collect()
        })
    }

    /// Evaluates `job` for every item, preserving order.
    pub fn map<I, T, F>(&self, items: &[I], token: &CancellationToken, job: F) -> Result<Vec<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(&I) -> Result<T> + Sync,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    token.check()?;
                    job(item)
                })
                .collect()
        })
    }
}
