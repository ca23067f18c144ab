use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::Span;

use crate::channel::{self, Receiver, RecvTimeout, Sender};
use crate::error::PoolError;
use crate::spec::PoolSpec;
use crate::Task;


/// A named worker pool with a strict FIFO queue, matching the `minor-compact`, `split`,
/// `assignment`, and `migrate` rows of the pool catalogue.
///
/// Workers beyond `core_threads` are spawned lazily, on submission, up to `max_threads`, and
/// exit once idle for `keep_alive`. `core_threads` workers never exit from idling, but still
/// wake periodically so a `shutdown()` is noticed without a task having to arrive first.
#[derive(Debug)]
pub struct FifoPool {
    name:       String,
    sender:     Sender<Task>,
    receiver:   Receiver<Task>,
    core:       AtomicUsize,
    max:        AtomicUsize,
    keep_alive: Mutex<Duration>,
    active:     AtomicUsize,
    shutdown:   AtomicBool,
    workers:    Mutex<Vec<JoinHandle<()>>>,
}

impl FifoPool {
    #[must_use]
    pub fn new(spec: PoolSpec) -> Arc<Self> {
        let (sender, receiver) = channel::unbounded_channel();
        let pool = Arc::new(Self {
            name:       spec.name,
            sender,
            receiver,
            core:       AtomicUsize::new(spec.core_threads),
            max:        AtomicUsize::new(spec.max_threads.max(spec.core_threads)),
            keep_alive: Mutex::new(spec.keep_alive),
            active:     AtomicUsize::new(0),
            shutdown:   AtomicBool::new(false),
            workers:    Mutex::new(Vec::new()),
        });

        for _ in 0..pool.core.load(Ordering::Relaxed) {
            pool.spawn_worker();
        }

        pool
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task, spawning an additional worker if the pool has not yet reached its
    /// configured maximum and every current worker may be busy.
    pub fn submit<F>(self: &Arc<Self>, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown(self.name.clone()));
        }

        self.sender
            .send(Box::new(task))
            .map_err(|_| PoolError::ShuttingDown(self.name.clone()))?;

        self.maybe_spawn_worker();
        Ok(())
    }

    /// Number of worker threads currently alive (idle or busy).
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Number of tasks waiting in the queue (not counting one a worker is currently running).
    #[must_use]
    pub fn queued_tasks(&self) -> usize {
        self.receiver.len()
    }

    /// Live-adjust the core and max worker counts, per the `10 s` reconfiguration task in
    /// the pool catalogue. Growing `core` spawns workers immediately; shrinking `max` below
    /// the current active count does not kill workers eagerly, they shrink on their own via
    /// `keep_alive` once idle.
    pub fn resize(self: &Arc<Self>, core: usize, max: usize) {
        let max = max.max(core);
        let old_core = self.core.swap(core, Ordering::AcqRel);
        self.max.store(max, Ordering::Release);

        if core > old_core {
            for _ in 0..(core - old_core) {
                self.spawn_worker();
            }
        }
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) {
        *self.keep_alive.lock() = keep_alive;
    }

    /// Stop accepting new tasks. Already-queued tasks still run to completion; core workers
    /// notice the shutdown on their next poll, within `CORE_POLL_INTERVAL`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Poll, at the given interval, until every worker has exited or `deadline` elapses.
    /// Returns `true` if every worker exited in time.
    pub fn await_termination(&self, deadline: Duration, poll_interval: Duration) -> bool {
        let start = Instant::now();
        loop {
            let handles = {
                let mut workers = self.workers.lock();
                workers.retain(|handle| !handle.is_finished());
                workers.is_empty()
            };

            if handles {
                return true;
            }
            if start.elapsed() >= deadline {
                tracing::warn!(pool = self.name, "pool did not terminate within the deadline");
                return false;
            }
            thread::sleep(poll_interval);
        }
    }

    fn maybe_spawn_worker(self: &Arc<Self>) {
        loop {
            let active   = self.active.load(Ordering::Relaxed);
            let max      = self.max.load(Ordering::Relaxed);
            if active >= max {
                return;
            }
            if self.active
                .compare_exchange(active, active + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.spawn_worker_with_active_already_counted();
                return;
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        self.active.fetch_add(1, Ordering::AcqRel);
        self.spawn_worker_with_active_already_counted();
    }

    fn spawn_worker_with_active_already_counted(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("tsrm-{}", pool.name))
            .spawn(move || pool.worker_loop())
            .expect("failed to spawn pool worker thread");

        self.workers.lock().push(handle);
    }

    fn worker_loop(&self) {
        let span = Span::current();
        let _entered = tracing::info_span!(parent: &span, "pool_worker", pool = self.name).entered();

        // Core workers never time out waiting for work, but they still poll at this interval so
        // a `shutdown()` with an empty queue is noticed promptly instead of blocking forever on
        // `recv`.
        const CORE_POLL_INTERVAL: Duration = Duration::from_millis(250);

        loop {
            let is_core = self.active.load(Ordering::Relaxed) <= self.core.load(Ordering::Relaxed);
            let keep_alive = *self.keep_alive.lock();

            let received = if is_core {
                channel::recv_timeout(&self.receiver, CORE_POLL_INTERVAL)
            } else if keep_alive.is_zero() {
                channel::recv(&self.receiver)
            } else {
                channel::recv_timeout(&self.receiver, keep_alive)
            };

            match received {
                Ok(task) => {
                    let task_span = tracing::info_span!("pool_task", pool = self.name);
                    let _entered = task_span.enter();
                    task();
                },
                Err(RecvTimeout::Disconnected) => break,
                Err(RecvTimeout::TimedOut) => {
                    if !is_core {
                        break;
                    }
                },
            }

            if self.shutdown.load(Ordering::Acquire) && self.receiver.len() == 0 {
                break;
            }
        }

        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn core_worker_survives_past_keep_alive() {
        let pool = FifoPool::new(
            PoolSpec::fixed_single("assignment").with_keep_alive(Duration::from_millis(10)),
        );
        thread::sleep(Duration::from_millis(50));
        assert_eq!(pool.active_workers(), 1);
    }

    #[test]
    fn submit_runs_on_a_spawned_worker() {
        let pool = FifoPool::new(PoolSpec::config_driven("minor-compact", 2));
        let (tx, rx) = crossbeam_channel::unbounded();

        pool.submit(move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn excess_worker_exits_after_keep_alive() {
        let pool = FifoPool::new(
            PoolSpec::config_driven("read-ahead", 4).with_keep_alive(Duration::from_millis(20)),
        );

        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..3 {
            let tx = tx.clone();
            pool.submit(move || tx.send(()).unwrap()).unwrap();
        }
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        thread::sleep(Duration::from_millis(200));
        assert_eq!(pool.active_workers(), 0);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let pool = FifoPool::new(PoolSpec::fixed_single("split"));
        pool.shutdown();
        let result = pool.submit(|| {});
        assert_eq!(result, Err(PoolError::ShuttingDown("split".to_owned())));
    }

    #[test]
    fn shutdown_wakes_idle_core_worker_and_terminates() {
        let pool = FifoPool::new(PoolSpec::fixed_single("meta-split"));
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5), Duration::from_millis(10)));
    }
}
