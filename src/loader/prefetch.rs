use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::loader::batch::Batch;
use crate::loader::reader::BatchReader;

/// Pause between checks while the queue is full (worker) or empty (consumer).
pub const PREFETCH_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct PrefetchState {
    queue: VecDeque<(usize, Result<Batch>)>,
    /// Batch the worker must produce next instead of advancing sequentially.
    desired: Option<usize>,
}

struct Shared {
    state: Mutex<PrefetchState>,
    stop: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PrefetchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background worker that keeps up to `capacity` decoded batches queued.
///
/// Batches are produced in order, wrapping to 0 after the last one, for as
/// long as the prefetcher lives. A request for a batch that is not at the
/// head of the queue makes the worker jump to it; work already queued in the
/// old order is discarded by the consumer as it drains.
pub struct Prefetcher {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Prefetcher {
    pub fn start(reader: Arc<BatchReader>, capacity: usize) -> Result<Prefetcher> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PrefetchState { queue: VecDeque::new(), desired: None }),
            stop: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let capacity = capacity.max(1);
        let handle = thread::Builder::new()
            .name("batch-prefetch".into())
            .spawn(move || run_worker(&reader, &worker_shared, capacity))
            .map_err(|e| PipelineError::Worker(format!("cannot spawn prefetch worker: {e}")))?;

        info!(capacity, "started async batch loading");
        Ok(Prefetcher { shared, handle: Some(handle) })
    }

    /// Blocks (polling) until batch `index` comes off the head of the queue.
    ///
    /// Mismatched heads are dropped. The first time this request sees one,
    /// and `index` is not already queued further back, it sets the
    /// desired-index override.
    pub fn next(&self, index: usize) -> Result<Batch> {
        let mut override_sent = false;
        loop {
            {
                let mut state = self.shared.lock();
                if let Some((produced, result)) = state.queue.pop_front() {
                    if produced == index {
                        return result;
                    }
                    // A worker failure ends production; report it now.
                    result?;
                    if !override_sent && !state.queue.iter().any(|(i, _)| *i == index) {
                        debug!(requested = index, found = produced, "out-of-order request");
                        state.desired = Some(index);
                        override_sent = true;
                    }
                    continue;
                }
            }

            if self.worker_finished() {
                return Err(PipelineError::Worker("prefetch worker exited".into()));
            }
            debug!("waiting for batch {}", index + 1);
            thread::sleep(PREFETCH_POLL_INTERVAL);
        }
    }

    /// Indices currently waiting in the queue, head first.
    pub fn queued(&self) -> Vec<usize> {
        self.shared.lock().queue.iter().map(|(i, _)| *i).collect()
    }

    fn worker_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("prefetch worker panicked");
            }
        }
    }
}

fn run_worker(reader: &BatchReader, shared: &Shared, capacity: usize) {
    let num_batches = reader.num_batches();
    let mut cursor = 0;

    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        let index = shared.lock().desired.take().unwrap_or(cursor);
        let result = reader.load_batch(index);
        let failed = result.is_err();
        shared.lock().queue.push_back((index, result));
        if failed {
            warn!(index, "prefetch worker stopping after a load failure");
            return;
        }
        cursor = (index + 1) % num_batches.max(1);

        loop {
            if shared.stop.load(Ordering::Acquire) {
                return;
            }
            if shared.lock().queue.len() < capacity {
                break;
            }
            thread::sleep(PREFETCH_POLL_INTERVAL);
        }
    }
}
