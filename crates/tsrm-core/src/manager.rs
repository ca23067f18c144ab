use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use quick_cache::sync::Cache;

use crate::collaborators::{CompactionStrategyRegistry, FileManager, MemoryManager, MemoryManagerRegistry};
use crate::commit_hold::CommitHoldGate;
use crate::config::{ConfigSnapshot, ConfigSource};
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigurationError, ResourceManagerError};
use crate::handle::TabletHandle;
use crate::memory_controller::{self, ReportTable};
use crate::report::TabletReport;
use crate::tablet_id::{TabletId, TabletKind};
use tsrm_pool::Task;

const POOL_RESIZE_INITIAL_DELAY: Duration = Duration::from_secs(1);
const POOL_RESIZE_INTERVAL:      Duration = Duration::from_secs(10);
const AWAIT_TERMINATION_POLL:    Duration = Duration::from_secs(60);

/// Shared state reachable both from the top-level [`ResourceManager`] and from every
/// [`TabletHandle`] it issues, via a [`Weak`] back-reference (never shared ownership — see the
/// handle's module docs).
#[derive(Debug)]
pub(crate) struct ManagerInner {
    pub(crate) close_lock:            Mutex<()>,
    pub(crate) tablet_reports:        Arc<ReportTable>,
    pub(crate) report_sender:         crossbeam_channel::Sender<memory_controller::ReportEnvelope>,
    pub(crate) memory_manager:        Arc<dyn MemoryManager>,
    pub(crate) compaction_strategies: CompactionStrategyRegistry,
    pub(crate) commit_hold:           Arc<CommitHoldGate>,
    pub(crate) dispatcher:            Dispatcher,
    pub(crate) file_manager:          Arc<dyn FileManager>,
}

/// A memory policy that never recommends anything, used when no [`MemoryManager`] is
/// registered for the configured class name. Startup still proceeds; the system simply never
/// initiates a system-driven minor compaction.
#[derive(Debug)]
struct NoOpMemoryManager;

impl MemoryManager for NoOpMemoryManager {
    fn init(&self, _config: &ConfigSnapshot) {}
    fn recommend(&self, _reports: &[TabletReport]) -> Vec<TabletId> {
        Vec::new()
    }
    fn tablet_closed(&self, _id: &TabletId) {}
}

/// Process-level memory figures consulted during startup validation (§6). Supplied by the
/// embedding application: "process max heap" and "in use" are runtime/platform concepts
/// external to this crate.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemoryInfo {
    pub process_max_heap: u64,
    pub in_use:           u64,
}

/// The top-level resource manager for one tablet server. Owns the pool registry (via its
/// [`Dispatcher`]), the two block caches, the memory-controller threads, and the commit-hold
/// gate.
#[derive(Debug)]
pub struct ResourceManager {
    inner:            Arc<ManagerInner>,
    config:           Arc<dyn ConfigSource>,
    data_cache:       Cache<String, Arc<[u8]>>,
    index_cache:      Cache<String, Arc<[u8]>>,
    shutdown:         Arc<AtomicBool>,
    guard_thread:     Mutex<Option<JoinHandle<()>>>,
    initiator_thread: Mutex<Option<JoinHandle<()>>>,
    resize_thread:    Mutex<Option<JoinHandle<()>>>,
}

impl ResourceManager {
    /// Run startup validation (§6), construct the pool registry/dispatcher, and spawn the
    /// guard, initiator, and pool-resize threads. On validation failure, returns `Err` without
    /// spawning any thread (§8, S8).
    pub fn new(
        config:                Arc<dyn ConfigSource>,
        process_memory:        ProcessMemoryInfo,
        memory_managers:       &MemoryManagerRegistry,
        compaction_strategies: CompactionStrategyRegistry,
        file_manager:          Arc<dyn FileManager>,
    ) -> Result<Self, ResourceManagerError> {
        let snapshot = config.snapshot();
        validate_startup(&snapshot, process_memory)?;

        let memory_manager: Arc<dyn MemoryManager> = memory_managers
            .construct(&snapshot.memory_manager_class)
            .map(Arc::from)
            .unwrap_or_else(|| {
                tracing::warn!(
                    class = snapshot.memory_manager_class,
                    "no memory manager registered for this class, falling back to a no-op policy",
                );
                Arc::new(NoOpMemoryManager)
            });
        memory_manager.init(&snapshot);

        let dispatcher = Dispatcher::new(&snapshot)?;
        let (report_sender, report_receiver) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let commit_hold = Arc::new(CommitHoldGate::new());
        let tablet_reports: Arc<ReportTable> = Arc::new(Mutex::new(HashMap::new()));

        let inner = Arc::new(ManagerInner {
            close_lock: Mutex::new(()),
            tablet_reports: Arc::clone(&tablet_reports),
            report_sender,
            memory_manager: Arc::clone(&memory_manager),
            compaction_strategies,
            commit_hold: Arc::clone(&commit_hold),
            dispatcher,
            file_manager,
        });

        let guard_thread = memory_controller::spawn_guard(
            report_receiver,
            Arc::clone(&tablet_reports),
            Arc::clone(&commit_hold),
            snapshot.max_memtable_bytes,
            Arc::clone(&shutdown),
        );
        let initiator_thread = memory_controller::spawn_initiator(
            Arc::clone(&tablet_reports),
            Arc::clone(&memory_manager),
            Arc::clone(&shutdown),
        );
        let resize_thread = spawn_resize_task(Arc::clone(&config), Arc::clone(&inner), Arc::clone(&shutdown));

        let data_cache = Cache::new(cache_capacity_hint(snapshot.data_cache_bytes));
        let index_cache = Cache::new(cache_capacity_hint(snapshot.index_cache_bytes));

        Ok(Self {
            inner,
            config,
            data_cache,
            index_cache,
            shutdown,
            guard_thread:     Mutex::new(Some(guard_thread)),
            initiator_thread: Mutex::new(Some(initiator_thread)),
            resize_thread:    Mutex::new(Some(resize_thread)),
        })
    }

    /// Create a resource handle for a newly loaded tablet. The handle holds a weak
    /// back-reference to this manager for dispatch and report publication only.
    #[must_use]
    pub fn create_handle(
        &self,
        tablet:       Arc<dyn crate::collaborators::Tablet>,
        table_config: Arc<ConfigSnapshot>,
    ) -> Arc<TabletHandle> {
        TabletHandle::new(tablet, table_config, Arc::downgrade(&self.inner))
    }

    /// Obtain a scan-file reservation for `tablet_id` from the configured [`FileManager`].
    #[must_use]
    pub fn new_scan_file_manager(
        &self,
        tablet_id: &TabletId,
    ) -> Box<dyn crate::collaborators::ScanFileManager> {
        self.inner.file_manager.new_scan_file_manager(tablet_id)
    }

    #[must_use]
    pub fn data_cache(&self) -> &Cache<String, Arc<[u8]>> {
        &self.data_cache
    }

    #[must_use]
    pub fn index_cache(&self) -> &Cache<String, Arc<[u8]>> {
        &self.index_cache
    }

    pub fn execute_split(&self, kind: TabletKind, task: Task) {
        self.inner.dispatcher.execute_split(kind, task);
    }

    pub fn execute_major_compaction(&self, kind: TabletKind, file_count: u64, task: Task) {
        self.inner.dispatcher.execute_major_compaction(kind, file_count, task);
    }

    pub fn execute_read_ahead(&self, kind: TabletKind, task: Task) {
        self.inner.dispatcher.execute_read_ahead(kind, task);
    }

    pub fn execute_minor_compaction(&self, task: Task) {
        self.inner.dispatcher.execute_minor_compaction(task);
    }

    pub fn add_assignment(&self, task: Task) {
        self.inner.dispatcher.add_assignment(task);
    }

    pub fn add_metadata_assignment(&self, task: Task) {
        self.inner.dispatcher.add_metadata_assignment(task);
    }

    pub fn add_migration(&self, kind: TabletKind, task: Task) {
        self.inner.dispatcher.add_migration(kind, task);
    }

    /// Block the calling (writer) thread until commits are enabled, or fail once the
    /// configured RPC timeout elapses while the gate is held.
    pub fn wait_until_commits_enabled(&self) -> Result<(), ResourceManagerError> {
        let rpc_timeout = self.config.snapshot().rpc_timeout;
        self.inner.commit_hold.wait_until_commits_enabled(rpc_timeout)
    }

    #[must_use]
    pub fn hold_time(&self) -> Duration {
        self.inner.commit_hold.hold_time()
    }

    pub fn stop_splits(&self) {
        self.inner.dispatcher.stop_splits();
    }

    pub fn stop_normal_assignments(&self) {
        self.inner.dispatcher.stop_normal_assignments();
    }

    pub fn stop_metadata_assignments(&self) {
        self.inner.dispatcher.stop_metadata_assignments();
    }

    /// Shut down every pool and both controller threads, then wait (polling every 60 s, and
    /// re-logging on each poll) for everything to finish.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.inner.dispatcher.shutdown_all();

        while !self.inner.dispatcher.await_termination_all(AWAIT_TERMINATION_POLL, Duration::from_millis(100)) {
            tracing::warn!("pools still shutting down, continuing to wait");
        }

        join_with_polling(&self.guard_thread, "memory guard");
        join_with_polling(&self.initiator_thread, "memory initiator");
        join_with_polling(&self.resize_thread, "pool resize task");
    }
}

fn join_with_polling(slot: &Mutex<Option<JoinHandle<()>>>, label: &str) {
    if let Some(handle) = slot.lock().take() {
        loop {
            if handle.is_finished() {
                if let Err(err) = handle.join() {
                    tracing::warn!(label, ?err, "thread panicked while shutting down");
                }
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        tracing::info!(label, "thread stopped");
    }
}

fn spawn_resize_task(
    config:   Arc<dyn ConfigSource>,
    inner:    Arc<ManagerInner>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("tsrm-pool-resize".to_owned())
        .spawn(move || {
            thread::sleep(POOL_RESIZE_INITIAL_DELAY);
            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                inner.dispatcher.reconfigure(&config.snapshot());
                thread::sleep(POOL_RESIZE_INTERVAL);
            }
        })
        .expect("failed to spawn pool resize thread")
}

fn validate_startup(
    config:         &ConfigSnapshot,
    process_memory: ProcessMemoryInfo,
) -> Result<(), ResourceManagerError> {
    if !config.native_map_enabled {
        let total = config.max_memtable_bytes + config.data_cache_bytes + config.index_cache_bytes;
        if total > process_memory.process_max_heap {
            tracing::error!(
                max_memtable_bytes = config.max_memtable_bytes,
                data_cache_bytes = config.data_cache_bytes,
                index_cache_bytes = config.index_cache_bytes,
                process_max_heap = process_memory.process_max_heap,
                "cache and memtable ceiling sizes exceed the process's maximum heap",
            );
            return Err(ResourceManagerError::Configuration(ConfigurationError::CachesExceedHeap {
                max_memtable_bytes: config.max_memtable_bytes,
                data_cache_bytes:   config.data_cache_bytes,
                index_cache_bytes:  config.index_cache_bytes,
                process_max_heap:   process_memory.process_max_heap,
            }));
        }
    }

    if config.max_memtable_bytes > process_memory.process_max_heap.saturating_sub(process_memory.in_use) {
        tracing::warn!(
            max_memtable_bytes = config.max_memtable_bytes,
            process_max_heap = process_memory.process_max_heap,
            in_use = process_memory.in_use,
            "configured memtable ceiling leaves little headroom against the process heap",
        );
    }

    // No equivalent of a forced GC cycle exists here; this marks where a future allocator
    // hook (e.g. jemalloc decay tuning) would go after cache allocation.

    Ok(())
}

fn cache_capacity_hint(bytes: u64) -> usize {
    // quick_cache sizes by item count, not bytes; the core only hands out cache handles and
    // never inspects entries, so a coarse item-count estimate is all that is needed here.
    (bytes / 4096).clamp(16, 1_000_000) as usize
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    use super::*;
    use crate::collaborators::{MemoryManagerRegistry, MinorCompactionReason, ScanFileManager, Tablet};
    use crate::config::SharedConfig;

    struct StubScanFileManager;
    impl ScanFileManager for StubScanFileManager {
        fn reserved_count(&self) -> usize {
            0
        }
    }

    struct StubFileManager;
    impl crate::collaborators::FileManager for StubFileManager {
        fn new_scan_file_manager(&self, _id: &TabletId) -> Box<dyn ScanFileManager> {
            Box::new(StubScanFileManager)
        }
    }

    fn sample_config(max_memtable_bytes: u64, native_map_enabled: bool) -> ConfigSnapshot {
        ConfigSnapshot {
            max_memtable_bytes,
            native_map_enabled,
            default_block_size: 65_536,
            data_cache_bytes: 1_000,
            index_cache_bytes: 1_000,
            max_open_scan_files: 10,
            minc_maxconcurrent: 1,
            majc_maxconcurrent: 1,
            migrate_maxconcurrent: 1,
            readahead_maxconcurrent: 1,
            metadata_readahead_maxconcurrent: 1,
            rpc_timeout: Duration::from_millis(200),
            compaction_strategy_class: "none".to_owned(),
            compaction_strategy_options: HashMap::new(),
            idle_compact_threshold: Duration::from_secs(1),
            memory_manager_class: "none".to_owned(),
        }
    }

    #[test]
    fn startup_fails_when_caches_exceed_heap_and_spawns_nothing() {
        let config = Arc::new(SharedConfig::new(sample_config(1_000, false)));
        let process_memory = ProcessMemoryInfo { process_max_heap: 1_500, in_use: 0 };

        let result = ResourceManager::new(
            config,
            process_memory,
            &MemoryManagerRegistry::new(),
            CompactionStrategyRegistry::new(),
            Arc::new(StubFileManager),
        );

        assert!(matches!(
            result,
            Err(ResourceManagerError::Configuration(ConfigurationError::CachesExceedHeap { .. }))
        ));
    }

    #[test]
    fn startup_succeeds_with_native_map_enabled() {
        let config = Arc::new(SharedConfig::new(sample_config(1_000, true)));
        let process_memory = ProcessMemoryInfo { process_max_heap: 1_500, in_use: 0 };

        let manager = ResourceManager::new(
            config,
            process_memory,
            &MemoryManagerRegistry::new(),
            CompactionStrategyRegistry::new(),
            Arc::new(StubFileManager),
        )
        .unwrap();

        manager.close();
    }

    struct StubTablet {
        extent: TabletId,
        closed: StdAtomicBool,
    }

    impl Tablet for StubTablet {
        fn initiate_minor_compaction(&self, _reason: MinorCompactionReason) -> bool {
            true
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
        fn get_extent(&self) -> TabletId {
            self.extent.clone()
        }
    }

    #[test]
    fn created_handle_reports_flow_into_the_manager() {
        let config = Arc::new(SharedConfig::new(sample_config(1_000_000, true)));
        let process_memory = ProcessMemoryInfo { process_max_heap: u64::MAX, in_use: 0 };
        let manager = ResourceManager::new(
            config,
            process_memory,
            &MemoryManagerRegistry::new(),
            CompactionStrategyRegistry::new(),
            Arc::new(StubFileManager),
        )
        .unwrap();

        let extent = TabletId::new("t1", None);
        let tablet = Arc::new(StubTablet { extent: extent.clone(), closed: StdAtomicBool::new(false) });
        let table_config = Arc::new(sample_config(1_000_000, true));
        let handle = manager.create_handle(tablet, table_config);

        handle.update_memory(1_000, 0);
        std::thread::sleep(Duration::from_millis(700));

        assert!(manager.inner.tablet_reports.lock().contains_key(&extent));

        manager.close();
    }
}
