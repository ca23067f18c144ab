use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::collaborators::{CompactionReason, MajorCompactionRequest, Tablet};
use crate::config::ConfigSnapshot;
use crate::error::ResourceManagerError;
use crate::manager::ManagerInner;
use crate::memory_controller::ReportEnvelope;
use crate::report::TabletReport;
use crate::tablet_id::TabletId;

/// Publish a new report once an incremental size change exceeds this many bytes.
const REPORT_DELTA_BYTES: i64 = 32_000;
/// Publish a new report if this long has elapsed since the last one, regardless of delta.
const REPORT_MAX_AGE: Duration = Duration::from_millis(1_000);

/// A lightweight, per-tablet object held for the tablet's lifetime. Tracks the values needed to
/// throttle memory reports upstream and to adjudicate major-compaction requests.
///
/// The two atomics that drive the report throttle ([`last_size`](Self::last_size) morally, via
/// `last_size`/`last_minc_size`) are read and compare-exchanged independently and deliberately:
/// this method runs on the write-hot path, and a single coarse lock would serialize every
/// tablet's commits through one monitor.
#[derive(Debug)]
pub struct TabletHandle {
    tablet_id:           TabletId,
    tablet:              Arc<dyn Tablet>,
    table_config:        Arc<ConfigSnapshot>,
    manager:             Weak<ManagerInner>,
    creation_time:       Instant,
    last_size:           AtomicU64,
    last_minc_size:      AtomicU64,
    last_commit_time_ms: AtomicU64,
    open_files_reserved: AtomicBool,
    closed:              AtomicBool,
    close_lock:          Mutex<()>,
}

impl TabletHandle {
    pub(crate) fn new(
        tablet:       Arc<dyn Tablet>,
        table_config: Arc<ConfigSnapshot>,
        manager:      Weak<ManagerInner>,
    ) -> Arc<Self> {
        let tablet_id = tablet.get_extent();
        Arc::new(Self {
            tablet_id,
            tablet,
            table_config,
            manager,
            creation_time:       Instant::now(),
            last_size:           AtomicU64::new(0),
            last_minc_size:      AtomicU64::new(0),
            last_commit_time_ms: AtomicU64::new(0),
            open_files_reserved: AtomicBool::new(false),
            closed:              AtomicBool::new(false),
            close_lock:          Mutex::new(()),
        })
    }

    #[must_use]
    pub fn tablet_id(&self) -> &TabletId {
        &self.tablet_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn set_open_files_reserved(&self, reserved: bool) {
        self.open_files_reserved.store(reserved, Ordering::Release);
    }

    /// Report the tablet's current memtable size and publish a throttled upstream report when
    /// the change is significant enough. See the module docs for the throttling rationale.
    pub fn update_memory(self: &Arc<Self>, size: u64, minc_size: u64) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let now = now_ms();
        let mut should_publish = false;

        let last_minc = self.last_minc_size.load(Ordering::Relaxed);
        let minc_crossed_boundary = (last_minc == 0) != (minc_size == 0);
        if minc_crossed_boundary
            && self
                .last_minc_size
                .compare_exchange(last_minc, minc_size, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            should_publish = true;
        }

        let last_size = self.last_size.load(Ordering::Relaxed);
        #[expect(clippy::cast_possible_wrap, reason = "byte counts stay far below i64::MAX")]
        let delta = (size as i64 + minc_size as i64) - last_size as i64;
        let last_commit = self.last_commit_time_ms.load(Ordering::Relaxed);
        let stale = now.saturating_sub(last_commit) > REPORT_MAX_AGE.as_millis() as u64;

        if (delta > REPORT_DELTA_BYTES || delta < 0 || stale)
            && self
                .last_size
                .compare_exchange(last_size, size, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            should_publish = true;
            if delta > 0 {
                self.last_commit_time_ms.store(now, Ordering::Release);
            }
        }

        if !should_publish {
            tracing::trace!(tablet = %self.tablet_id, "dropped redundant memory report");
            return;
        }

        let report = TabletReport {
            tablet_id:              self.tablet_id.clone(),
            memtable_bytes:         size,
            minor_compacting_bytes: minc_size,
            last_commit_time_ms:    self.last_commit_time_ms.load(Ordering::Acquire),
        };
        tracing::debug!(tablet = %self.tablet_id, ?report, "publishing memory report");

        if let Some(manager) = self.manager.upgrade() {
            let envelope = ReportEnvelope { report, source: Arc::downgrade(self) };
            if manager.report_sender.send(envelope).is_err() {
                tracing::warn!(tablet = %self.tablet_id, "report channel closed, dropping report");
            }
        }
    }

    /// Adjudicate whether this tablet should undergo a major compaction right now.
    pub fn needs_major_compaction(&self, files: Vec<String>, reason: CompactionReason) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        if reason == CompactionReason::User {
            return true;
        }

        if reason == CompactionReason::Idle {
            let last_commit = self.last_commit_time_ms.load(Ordering::Acquire);
            let idle_since = if last_commit == 0 {
                self.creation_time.elapsed()
            } else {
                Duration::from_millis(now_ms().saturating_sub(last_commit))
            };

            if idle_since < self.table_config.idle_compact_threshold {
                return false;
            }
        }

        let Some(manager) = self.manager.upgrade() else {
            tracing::warn!(tablet = %self.tablet_id, "manager gone, skipping major-compaction adjudication");
            return false;
        };

        let Some(mut strategy) = manager
            .compaction_strategies
            .construct(&self.table_config.compaction_strategy_class)
        else {
            tracing::warn!(
                class = self.table_config.compaction_strategy_class,
                "no compaction strategy registered for this class, conservatively refusing",
            );
            return false;
        };
        strategy.init(&self.table_config.compaction_strategy_options);

        let request = MajorCompactionRequest {
            tablet_id: self.tablet_id.clone(),
            reason,
            files,
            config: Arc::clone(&self.table_config),
        };

        match strategy.should_compact(&request) {
            Ok(should_compact) => should_compact,
            Err(err) => {
                tracing::warn!(tablet = %self.tablet_id, error = %err, "compaction strategy I/O failure, conservatively refusing");
                false
            },
        }
    }

    /// Close the handle. Acquires the manager-wide lock before the handle's own lock, matching
    /// the fixed global order used everywhere else a manager and a handle are locked together.
    /// Not idempotent: closing an already-closed handle is an error.
    pub fn close(&self) -> Result<(), ResourceManagerError> {
        let Some(manager) = self.manager.upgrade() else {
            return Err(ResourceManagerError::AlreadyClosed(self.tablet_id.clone()));
        };

        let _manager_guard = manager.close_lock.lock();
        let _handle_guard = self.close_lock.lock();

        if self.closed.load(Ordering::Acquire) {
            return Err(ResourceManagerError::AlreadyClosed(self.tablet_id.clone()));
        }
        if self.open_files_reserved.load(Ordering::Acquire) {
            return Err(ResourceManagerError::OpenFilesStillReserved(self.tablet_id.clone()));
        }

        manager.tablet_reports.lock().remove(&self.tablet_id);
        manager.memory_manager.tablet_closed(&self.tablet_id);
        self.closed.store(true, Ordering::Release);

        tracing::info!(tablet = %self.tablet_id, "tablet handle closed");
        Ok(())
    }

    pub(crate) fn tablet(&self) -> &Arc<dyn Tablet> {
        &self.tablet
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    use super::*;

    struct StubTablet {
        extent: TabletId,
        closed: StdAtomicBool,
    }

    impl Tablet for StubTablet {
        fn initiate_minor_compaction(&self, _reason: crate::collaborators::MinorCompactionReason) -> bool {
            true
        }
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
        fn get_extent(&self) -> TabletId {
            self.extent.clone()
        }
    }

    fn handle_without_manager() -> Arc<TabletHandle> {
        let tablet = Arc::new(StubTablet { extent: TabletId::new("t1", None), closed: StdAtomicBool::new(false) });
        let config = Arc::new(crate::config::ConfigSnapshot {
            max_memtable_bytes: 1,
            native_map_enabled: true,
            default_block_size: 1,
            data_cache_bytes: 1,
            index_cache_bytes: 1,
            max_open_scan_files: 1,
            minc_maxconcurrent: 1,
            majc_maxconcurrent: 1,
            migrate_maxconcurrent: 1,
            readahead_maxconcurrent: 1,
            metadata_readahead_maxconcurrent: 1,
            rpc_timeout: Duration::from_secs(1),
            compaction_strategy_class: "none".to_owned(),
            compaction_strategy_options: std::collections::HashMap::new(),
            idle_compact_threshold: Duration::from_secs(3600),
            memory_manager_class: "none".to_owned(),
        });
        TabletHandle::new(tablet, config, Weak::new())
    }

    #[test]
    fn first_update_always_publishes_but_needs_a_manager_to_observe() {
        // With no manager attached, update_memory silently drops the envelope; this test only
        // checks that it does not panic and that the CAS state advances.
        let handle = handle_without_manager();
        handle.update_memory(1_000, 0);
        assert_eq!(handle.last_size.load(Ordering::Relaxed), 1_000);
    }

    #[test]
    fn small_delta_within_window_does_not_advance_last_size() {
        let handle = handle_without_manager();
        handle.update_memory(1_000, 0);
        handle.update_memory(1_010, 0);
        // Second call's delta (10) is below the threshold and within 1s, so the CAS condition
        // is false and last_size should remain at the first published value.
        assert_eq!(handle.last_size.load(Ordering::Relaxed), 1_000);
    }

    #[test]
    fn minc_boundary_crossing_updates_last_minc_size() {
        let handle = handle_without_manager();
        handle.update_memory(5_000, 0);
        handle.update_memory(5_000, 1);
        assert_eq!(handle.last_minc_size.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn user_reason_always_needs_major_compaction() {
        let handle = handle_without_manager();
        assert!(handle.needs_major_compaction(vec![], CompactionReason::User));
    }

    #[test]
    fn closed_handle_never_needs_major_compaction() {
        let handle = handle_without_manager();
        handle.closed.store(true, Ordering::Release);
        assert!(!handle.needs_major_compaction(vec![], CompactionReason::User));
    }

    #[test]
    fn idle_reason_respects_threshold_via_creation_time() {
        let handle = handle_without_manager();
        // idle_compact_threshold is 3600s and no commit has ever been reported, so creation_time
        // substitutes and the handle has not been idle nearly that long yet.
        assert!(!handle.needs_major_compaction(vec![], CompactionReason::Idle));
    }
}
