//! Face detection worker pool.
//!
//! A dedicated rayon pool sized from the configuration. Submissions beyond
//! the in-flight capacity run on the submitting thread instead of queueing,
//! so a fast decoder cannot buffer an unbounded number of frames.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::error::{EngineError, EngineResult};

/// Rayon pool that runs face detection off the decode thread.
///
/// At most `capacity` jobs may be queued or running; past that, `submit` runs
/// the job on the calling thread so the decoder slows to detection speed.
pub struct DetectionPool {
    pool: rayon::ThreadPool,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
}

/// Decrements the in-flight count when a job ends, including by panic.
struct InFlightSlot(Arc<AtomicUsize>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl DetectionPool {
    /// Build a pool of `workers` threads named `dfd-detect-{i}`.
    pub fn new(workers: usize, capacity: usize) -> EngineResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("dfd-detect-{}", i))
            .panic_handler(|payload| {
                error!("Detection job panicked: {}", panic_message(payload.as_ref()));
            })
            .build()
            .map_err(|e| EngineError::worker_panicked(format!("Failed to build detection pool: {e}")))?;

        Ok(Self {
            pool,
            in_flight: Arc::new(AtomicUsize::new(0)),
            capacity: capacity.max(1),
        })
    }

    /// Run `job` on the pool, or on the calling thread when the pool is
    /// saturated.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let previous = self.in_flight.fetch_add(1, Ordering::AcqRel);
        let slot = InFlightSlot(Arc::clone(&self.in_flight));

        if previous >= self.capacity {
            let outcome = catch_unwind(AssertUnwindSafe(job));
            drop(slot);
            if let Err(payload) = outcome {
                warn!("Caller-run detection job panicked: {}", panic_message(payload.as_ref()));
            }
            return;
        }

        self.pool.spawn(move || {
            let _slot = slot;
            job();
        });
    }

    /// Run `op` inside the pool so nested rayon work uses its threads.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
