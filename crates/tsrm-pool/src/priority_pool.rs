use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::PoolError;
use crate::spec::PoolSpec;
use crate::Task;


/// A task queued into a [`PriorityPool`], ranked by a caller-supplied key. Higher ranks run
/// first; ties fall back to submission order (lower sequence number first), matching the
/// "more files first, oldest first among equals" ordering used for major compactions.
struct RankedTask {
    rank:     u64,
    sequence: u64,
    task:     Task,
}

impl PartialEq for RankedTask {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.sequence == other.sequence
    }
}

impl Eq for RankedTask {}

impl PartialOrd for RankedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: higher rank must compare greater. Among equal ranks, the
        // task submitted earlier (smaller sequence) must win, so its ordering is reversed.
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// An unbounded queue, ranked by submission-time priority rather than FIFO order, matching the
/// `major-compact` pool: candidates with more files to merge run before candidates with fewer,
/// and equal-priority candidates run oldest-first.
///
/// Unlike [`FifoPool`](crate::FifoPool), `PriorityPool` has a single fixed-size worker set
/// (no core/max distinction): the catalogue's `major-compact` row states a flat worker count
/// with no keep-alive-driven shrink.
#[derive(Debug)]
pub struct PriorityPool {
    name:     String,
    heap:     Mutex<BinaryHeap<RankedTask>>,
    not_empty: Condvar,
    sequence: AtomicU64,
    size:     AtomicUsize,
    active:   AtomicUsize,
    shutdown: AtomicBool,
    workers:  Mutex<Vec<JoinHandle<()>>>,
}

impl PriorityPool {
    #[must_use]
    pub fn new(spec: PoolSpec) -> Arc<Self> {
        let pool = Arc::new(Self {
            name:      spec.name,
            heap:      Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            sequence:  AtomicU64::new(0),
            size:      AtomicUsize::new(spec.max_threads),
            active:    AtomicUsize::new(0),
            shutdown:  AtomicBool::new(false),
            workers:   Mutex::new(Vec::new()),
        });

        for _ in 0..spec.max_threads {
            pool.spawn_worker();
        }

        pool
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task with the given rank. Larger ranks are dequeued first.
    pub fn submit<F>(&self, rank: u64, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown(self.name.clone()));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let ranked = RankedTask { rank, sequence, task: Box::new(task) };

        self.heap.lock().push(ranked);
        self.not_empty.notify_one();
        Ok(())
    }

    #[must_use]
    pub fn queued_tasks(&self) -> usize {
        self.heap.lock().len()
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Live-adjust the fixed worker count. Growing spawns workers immediately; shrinking wakes
    /// every worker so the excess ones notice `active > size` and exit.
    pub fn resize(self: &Arc<Self>, workers: usize) {
        let old = self.size.swap(workers, Ordering::AcqRel);
        if workers > old {
            for _ in 0..(workers - old) {
                self.spawn_worker();
            }
        } else if workers < old {
            self.not_empty.notify_all();
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    /// Poll, at the given interval, until every worker has exited or `deadline` elapses.
    pub fn await_termination(&self, deadline: Duration, poll_interval: Duration) -> bool {
        let start = Instant::now();
        loop {
            let done = {
                let mut workers = self.workers.lock();
                workers.retain(|handle| !handle.is_finished());
                workers.is_empty()
            };

            if done {
                return true;
            }
            if start.elapsed() >= deadline {
                tracing::warn!(pool = self.name, "pool did not terminate within the deadline");
                return false;
            }
            thread::sleep(poll_interval);
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        self.active.fetch_add(1, Ordering::AcqRel);
        let pool = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("tsrm-{}", pool.name))
            .spawn(move || pool.worker_loop())
            .expect("failed to spawn pool worker thread");

        self.workers.lock().push(handle);
    }

    fn worker_loop(&self) {
        let _span = tracing::info_span!("pool_worker", pool = self.name).entered();

        loop {
            let task = {
                let mut heap = self.heap.lock();
                loop {
                    if let Some(ranked) = heap.pop() {
                        break Some(ranked.task);
                    }
                    if self.shutdown.load(Ordering::Acquire) {
                        break None;
                    }
                    // A worker that wakes to find the pool has shrunk below the current
                    // active count exits rather than going back to sleep; which worker this
                    // happens to be does not matter, only that exactly one steps down.
                    if self.active.load(Ordering::Acquire) > self.size.load(Ordering::Acquire)
                        && self
                            .active
                            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                                (active > self.size.load(Ordering::Acquire)).then_some(active - 1)
                            })
                            .is_ok()
                    {
                        break None;
                    }
                    self.not_empty.wait(&mut heap);
                    if self.shutdown.load(Ordering::Acquire) && heap.is_empty() {
                        break None;
                    }
                }
            };

            let Some(task) = task else { break };

            let task_span = tracing::info_span!("pool_task", pool = self.name);
            let _entered = task_span.enter();
            task();
        }
    }
}
