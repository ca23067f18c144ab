use std::sync::Arc;
use std::time::Duration;

use tsrm_pool::{FifoPool, PoolRegistry, PoolSpec, PriorityPool, QueueDiscipline, Task};

use crate::config::ConfigSnapshot;
use crate::error::{ConfigurationError, ResourceManagerError};
use crate::tablet_id::TabletKind;

const META_MAJC_KEEP_ALIVE:  Duration = Duration::from_secs(300);
const META_POOL_KEEP_ALIVE:  Duration = Duration::from_secs(60);

/// The fixed set of named worker pools described by the pool catalogue, and the routing logic
/// that sends each background action to exactly one of them (or runs it inline, for the root
/// tablet).
///
/// Field names mirror the pool catalogue's pool ids so the mapping from spec to code is
/// direct.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    registry: PoolRegistry,

    minor_compact:        Arc<FifoPool>,
    major_compact:        Arc<PriorityPool>,
    meta_major_compact:   Arc<FifoPool>,
    root_major_compact:   Arc<FifoPool>,
    split:                Arc<FifoPool>,
    meta_split:           Arc<FifoPool>,
    migrate:              Arc<FifoPool>,
    meta_migrate:         Arc<FifoPool>,
    assignment:           Arc<FifoPool>,
    meta_assignment:      Arc<FifoPool>,
    read_ahead:           Arc<FifoPool>,
    meta_read_ahead:      Arc<FifoPool>,
}

impl Dispatcher {
    pub(crate) fn new(config: &ConfigSnapshot) -> Result<Self, ResourceManagerError> {
        let registry = PoolRegistry::new();

        let minor_compact = registry
            .register_fifo(PoolSpec::config_driven("minor-compact", config.minc_maxconcurrent))
            .map_err(duplicate_pool_name)?;
        let major_compact = registry
            .register_priority(
                PoolSpec::config_driven("major-compact", config.majc_maxconcurrent)
                    .with_discipline(QueueDiscipline::Priority),
            )
            .map_err(duplicate_pool_name)?;
        let meta_major_compact = registry
            .register_fifo(
                PoolSpec::fixed_single("meta-major-compact")
                    .with_core_threads(0)
                    .with_keep_alive(META_MAJC_KEEP_ALIVE),
            )
            .map_err(duplicate_pool_name)?;
        let root_major_compact = registry
            .register_fifo(
                PoolSpec::fixed_single("root-major-compact")
                    .with_core_threads(0)
                    .with_keep_alive(META_MAJC_KEEP_ALIVE),
            )
            .map_err(duplicate_pool_name)?;
        let split = registry
            .register_fifo(PoolSpec::fixed_single("split"))
            .map_err(duplicate_pool_name)?;
        let meta_split = registry
            .register_fifo(PoolSpec::fixed_single("meta-split").with_keep_alive(META_POOL_KEEP_ALIVE))
            .map_err(duplicate_pool_name)?;
        let migrate = registry
            .register_fifo(PoolSpec::config_driven("migrate", config.migrate_maxconcurrent))
            .map_err(duplicate_pool_name)?;
        let meta_migrate = registry
            .register_fifo(PoolSpec::fixed_single("meta-migrate").with_keep_alive(META_POOL_KEEP_ALIVE))
            .map_err(duplicate_pool_name)?;
        let assignment = registry
            .register_fifo(PoolSpec::fixed_single("assignment"))
            .map_err(duplicate_pool_name)?;
        let meta_assignment = registry
            .register_fifo(PoolSpec::fixed_single("meta-assignment").with_keep_alive(META_POOL_KEEP_ALIVE))
            .map_err(duplicate_pool_name)?;
        let read_ahead = registry
            .register_fifo(PoolSpec::config_driven("read-ahead", config.readahead_maxconcurrent))
            .map_err(duplicate_pool_name)?;
        let meta_read_ahead = registry
            .register_fifo(PoolSpec::config_driven(
                "meta-read-ahead",
                config.metadata_readahead_maxconcurrent,
            ))
            .map_err(duplicate_pool_name)?;

        Ok(Self {
            registry,
            minor_compact,
            major_compact,
            meta_major_compact,
            root_major_compact,
            split,
            meta_split,
            migrate,
            meta_migrate,
            assignment,
            meta_assignment,
            read_ahead,
            meta_read_ahead,
        })
    }

    pub(crate) fn execute_split(&self, kind: TabletKind, task: Task) {
        match kind {
            TabletKind::Root => tracing::warn!("split requested against the root tablet, ignoring"),
            TabletKind::Metadata => submit_fifo(&self.meta_split, task),
            TabletKind::User => submit_fifo(&self.split, task),
        }
    }

    pub(crate) fn execute_major_compaction(&self, kind: TabletKind, rank: u64, task: Task) {
        match kind {
            TabletKind::Root => submit_fifo(&self.root_major_compact, task),
            TabletKind::Metadata => submit_fifo(&self.meta_major_compact, task),
            TabletKind::User => {
                if let Err(err) = self.major_compact.submit(rank, move || task()) {
                    tracing::warn!(error = %err, "failed to submit major compaction task");
                }
            },
        }
    }

    /// Runs `task` inline, on the caller's thread, for the root tablet; otherwise routes it to
    /// the appropriate read-ahead pool.
    pub(crate) fn execute_read_ahead(&self, kind: TabletKind, task: Task) {
        match kind {
            TabletKind::Root => task(),
            TabletKind::Metadata => submit_fifo(&self.meta_read_ahead, task),
            TabletKind::User => submit_fifo(&self.read_ahead, task),
        }
    }

    pub(crate) fn execute_minor_compaction(&self, task: Task) {
        submit_fifo(&self.minor_compact, task);
    }

    pub(crate) fn add_assignment(&self, task: Task) {
        submit_fifo(&self.assignment, task);
    }

    pub(crate) fn add_metadata_assignment(&self, task: Task) {
        submit_fifo(&self.meta_assignment, task);
    }

    /// Runs `task` inline for the root tablet; otherwise routes it to the appropriate migration
    /// pool.
    pub(crate) fn add_migration(&self, kind: TabletKind, task: Task) {
        match kind {
            TabletKind::Root => task(),
            TabletKind::Metadata => submit_fifo(&self.meta_migrate, task),
            TabletKind::User => submit_fifo(&self.migrate, task),
        }
    }

    /// Re-read config-driven pool sizes and, if changed, resize the corresponding pools.
    /// Failures are logged and swallowed so the periodic resize task can keep running.
    pub(crate) fn reconfigure(&self, config: &ConfigSnapshot) {
        self.minor_compact.resize(0, config.minc_maxconcurrent);
        self.major_compact.resize(config.majc_maxconcurrent);
        self.migrate.resize(0, config.migrate_maxconcurrent);
        self.read_ahead.resize(0, config.readahead_maxconcurrent);
        self.meta_read_ahead.resize(0, config.metadata_readahead_maxconcurrent);
        tracing::info!("pool sizes reconfigured");
    }

    pub(crate) fn stop_splits(&self) {
        self.split.shutdown();
        self.meta_split.shutdown();
    }

    pub(crate) fn stop_normal_assignments(&self) {
        self.assignment.shutdown();
    }

    pub(crate) fn stop_metadata_assignments(&self) {
        self.meta_assignment.shutdown();
    }

    pub(crate) fn shutdown_all(&self) {
        self.registry.shutdown_all();
    }

    #[must_use]
    pub(crate) fn await_termination_all(&self, deadline: Duration, poll_interval: Duration) -> bool {
        self.registry.await_termination_all(deadline, poll_interval)
    }
}

fn submit_fifo(pool: &Arc<FifoPool>, task: Task) {
    if let Err(err) = pool.submit(move || task()) {
        tracing::warn!(pool = pool.name(), error = %err, "failed to submit task");
    }
}

/// The pool catalogue is fixed and every name in it is distinct, so a registration failure here
/// can only mean a programmer error in the catalogue itself. Surfaced as a `ConfigurationError`
/// rather than a panic so it is reported the same way as any other startup misconfiguration.
fn duplicate_pool_name(err: tsrm_pool::PoolError) -> ResourceManagerError {
    ConfigurationError::DuplicatePoolName(err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::config::ConfigSnapshot;
    use std::collections::HashMap;

    fn sample_config() -> ConfigSnapshot {
        ConfigSnapshot {
            max_memtable_bytes: 1,
            native_map_enabled: true,
            default_block_size: 1,
            data_cache_bytes: 1,
            index_cache_bytes: 1,
            max_open_scan_files: 1,
            minc_maxconcurrent: 2,
            majc_maxconcurrent: 1,
            migrate_maxconcurrent: 1,
            readahead_maxconcurrent: 1,
            metadata_readahead_maxconcurrent: 1,
            rpc_timeout: Duration::from_secs(1),
            compaction_strategy_class: "none".to_owned(),
            compaction_strategy_options: HashMap::new(),
            idle_compact_threshold: Duration::from_secs(1),
            memory_manager_class: "none".to_owned(),
        }
    }

    #[test]
    fn read_ahead_on_root_runs_inline() {
        let dispatcher = Dispatcher::new(&sample_config()).unwrap();
        let (tx, rx) = mpsc::channel();
        let this_thread = std::thread::current().id();

        dispatcher.execute_read_ahead(
            TabletKind::Root,
            Box::new(move || tx.send(std::thread::current().id()).unwrap()),
        );

        assert_eq!(rx.recv().unwrap(), this_thread);
    }

    #[test]
    fn major_compaction_runs_higher_rank_first() {
        let dispatcher = Dispatcher::new(&sample_config()).unwrap();
        let (tx, rx) = mpsc::channel();

        // Occupy the single worker so both submissions queue before either runs.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        dispatcher.execute_major_compaction(TabletKind::User, 0, Box::new(move || {
            gate_rx.recv().unwrap();
        }));
        std::thread::sleep(Duration::from_millis(50));

        let tx_low = tx.clone();
        dispatcher.execute_major_compaction(TabletKind::User, 1, Box::new(move || tx_low.send("low").unwrap()));
        dispatcher.execute_major_compaction(TabletKind::User, 9, Box::new(move || tx.send("high").unwrap()));

        gate_tx.send(()).unwrap();
        assert_eq!(rx.recv().unwrap(), "high");
    }
}
