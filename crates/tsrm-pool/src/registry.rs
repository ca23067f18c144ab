use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::PoolError;
use crate::priority_pool::PriorityPool;
use crate::spec::{PoolSpec, QueueDiscipline};
use crate::worker_pool::FifoPool;


/// A name-unique collection of the pools a resource manager owns.
///
/// A single name space is shared between the FIFO and priority pools: registering `"split"` as
/// a FIFO pool and later as a priority pool both fail with
/// [`PoolError::DuplicateName`] once the first registration has succeeded.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    fifo:     Mutex<HashMap<String, Arc<FifoPool>>>,
    priority: Mutex<HashMap<String, Arc<PriorityPool>>>,
}

impl PoolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct and register a pool from `spec`, dispatching to [`FifoPool`] or
    /// [`PriorityPool`] by [`spec.discipline`](PoolSpec::discipline).
    pub fn register(&self, spec: PoolSpec) -> Result<(), PoolError> {
        match spec.discipline {
            QueueDiscipline::Fifo     => self.register_fifo(spec).map(|_| ()),
            QueueDiscipline::Priority => self.register_priority(spec).map(|_| ()),
        }
    }

    pub fn register_fifo(&self, spec: PoolSpec) -> Result<Arc<FifoPool>, PoolError> {
        self.reserve_name(&spec.name)?;
        let pool = FifoPool::new(spec);
        self.fifo.lock().insert(pool.name().to_owned(), Arc::clone(&pool));
        Ok(pool)
    }

    pub fn register_priority(&self, spec: PoolSpec) -> Result<Arc<PriorityPool>, PoolError> {
        self.reserve_name(&spec.name)?;
        let pool = PriorityPool::new(spec);
        self.priority.lock().insert(pool.name().to_owned(), Arc::clone(&pool));
        Ok(pool)
    }

    #[must_use]
    pub fn fifo_pool(&self, name: &str) -> Option<Arc<FifoPool>> {
        self.fifo.lock().get(name).cloned()
    }

    #[must_use]
    pub fn priority_pool(&self, name: &str) -> Option<Arc<PriorityPool>> {
        self.priority.lock().get(name).cloned()
    }

    /// Stop every registered pool from accepting new tasks. Queued and in-flight tasks still
    /// run to completion.
    pub fn shutdown_all(&self) {
        for pool in self.fifo.lock().values() {
            pool.shutdown();
        }
        for pool in self.priority.lock().values() {
            pool.shutdown();
        }
    }

    /// Poll every registered pool until each has drained or `deadline` elapses. Returns `true`
    /// only if every pool terminated in time.
    pub fn await_termination_all(&self, deadline: Duration, poll_interval: Duration) -> bool {
        let start = std::time::Instant::now();
        let fifo_pools: Vec<_> = self.fifo.lock().values().cloned().collect();
        let priority_pools: Vec<_> = self.priority.lock().values().cloned().collect();

        let mut all_done = true;
        for pool in fifo_pools {
            let remaining = deadline.saturating_sub(start.elapsed());
            all_done &= pool.await_termination(remaining, poll_interval);
        }
        for pool in priority_pools {
            let remaining = deadline.saturating_sub(start.elapsed());
            all_done &= pool.await_termination(remaining, poll_interval);
        }
        all_done
    }

    fn reserve_name(&self, name: &str) -> Result<(), PoolError> {
        if self.fifo.lock().contains_key(name) || self.priority.lock().contains_key(name) {
            return Err(PoolError::DuplicateName(name.to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected_across_disciplines() {
        let registry = PoolRegistry::new();
        registry.register_fifo(PoolSpec::fixed_single("split")).unwrap();

        let err = registry
            .register_priority(PoolSpec::config_driven("split", 4))
            .unwrap_err();
        assert_eq!(err, PoolError::DuplicateName("split".to_owned()));
    }

    #[test]
    fn fifo_pool_runs_submitted_tasks() {
        let registry = PoolRegistry::new();
        let pool = registry.register_fifo(PoolSpec::fixed_single("assignment")).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        pool.submit(move || tx.send(42).unwrap()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn priority_pool_runs_higher_rank_first() {
        let registry = PoolRegistry::new();
        let pool = registry
            .register_priority(PoolSpec::config_driven("major-compact", 1).with_discipline(QueueDiscipline::Priority))
            .unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let gate_clone = Arc::clone(&gate);

        // Block the single worker so both submissions land in the heap before either runs.
        pool.submit(0, move || {
            gate_clone.wait();
        })
        .unwrap();
        gate.wait();

        let tx_low = tx.clone();
        pool.submit(1, move || tx_low.send("low").unwrap()).unwrap();
        pool.submit(5, move || tx.send("high").unwrap()).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, "high");
    }
}
