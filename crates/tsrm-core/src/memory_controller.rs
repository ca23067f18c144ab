use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::collaborators::MinorCompactionReason;
use crate::commit_hold::CommitHoldGate;
use crate::handle::TabletHandle;
use crate::report::TabletReport;
use crate::tablet_id::TabletId;

/// Aggregation runs if the previous total exceeded this fraction of the ceiling.
const AGGREGATION_HOT_FRACTION: f64 = 0.90;
/// The back-pressure gate engages once aggregate usage exceeds this fraction of the ceiling.
const HOLD_FRACTION: f64 = 0.95;
/// Minimum time between aggregation passes, absent a hot-fraction or held-gate override.
const AGGREGATION_MIN_INTERVAL: Duration = Duration::from_millis(50);
/// Fixed sleep at the tail of every initiator iteration.
const INITIATOR_INTERVAL: Duration = Duration::from_millis(250);

/// One report, tagged with a weak reference back to the handle that produced it. The weak
/// reference lets the initiator's close-race guard (§4.4 step 4) do an identity compare rather
/// than an equality compare.
pub(crate) struct ReportEnvelope {
    pub(crate) report: TabletReport,
    pub(crate) source: Weak<TabletHandle>,
}

/// The authoritative per-tablet report table shared by the guard and initiator tasks.
pub(crate) type ReportTable = Mutex<HashMap<TabletId, (TabletReport, Weak<TabletHandle>)>>;

/// A pluggable judge of aggregate memory usage, consulted once per guard aggregation pass.
/// Kept minimal and internal: the ceiling itself lives in configuration, not here.
#[derive(Debug)]
pub(crate) struct AggregationState {
    last_total: AtomicU64,
    last_aggregated_at: Mutex<Instant>,
}

impl AggregationState {
    pub(crate) fn new() -> Self {
        Self { last_total: AtomicU64::new(0), last_aggregated_at: Mutex::new(Instant::now()) }
    }
}

impl Default for AggregationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the guard task: drains the report channel into `reports`, then runs a gated
/// aggregation pass against `commit_hold`.
pub(crate) fn spawn_guard(
    receiver:    Receiver<ReportEnvelope>,
    reports:     Arc<ReportTable>,
    commit_hold: Arc<CommitHoldGate>,
    max_memtable_bytes: u64,
    shutdown:    Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("tsrm-memory-guard".to_owned())
        .spawn(move || {
            let state = AggregationState::new();

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                match receiver.recv_timeout(Duration::from_millis(500)) {
                    Ok(envelope) => {
                        upsert(&reports, envelope);
                        // Drain whatever else is already queued without blocking.
                        while let Ok(envelope) = receiver.try_recv() {
                            upsert(&reports, envelope);
                        }
                    },
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                maybe_aggregate(&reports, &commit_hold, &state, max_memtable_bytes);
            }

            tracing::info!("memory guard task exiting");
        })
        .expect("failed to spawn memory guard thread")
}

fn upsert(reports: &Arc<ReportTable>, envelope: ReportEnvelope) {
    reports
        .lock()
        .insert(envelope.report.tablet_id.clone(), (envelope.report, envelope.source));
}

fn maybe_aggregate(
    reports:            &Arc<ReportTable>,
    commit_hold:        &Arc<CommitHoldGate>,
    state:              &AggregationState,
    max_memtable_bytes: u64,
) {
    let previous_total = state.last_total.load(Ordering::Relaxed);
    let previous_hot = max_memtable_bytes > 0
        && (previous_total as f64 / max_memtable_bytes as f64) > AGGREGATION_HOT_FRACTION;

    let should_aggregate = commit_hold.is_held()
        || previous_hot
        || state.last_aggregated_at.lock().elapsed() >= AGGREGATION_MIN_INTERVAL;

    if !should_aggregate {
        return;
    }

    let total: u64 = reports.lock().values().map(|(report, _)| report.total_bytes()).sum();
    state.last_total.store(total, Ordering::Relaxed);
    *state.last_aggregated_at.lock() = Instant::now();

    let fraction = if max_memtable_bytes > 0 { total as f64 / max_memtable_bytes as f64 } else { 0.0 };
    tracing::trace!(total, max_memtable_bytes, fraction, "aggregation pass");

    if fraction > HOLD_FRACTION {
        commit_hold.hold();
    } else {
        commit_hold.release();
    }
}

/// Spawn the initiator task: every 250 ms, consult `memory_policy.recommend` over a snapshot of
/// `reports` and ask each recommended tablet to minor-compact.
pub(crate) fn spawn_initiator(
    reports:       Arc<ReportTable>,
    memory_policy: Arc<dyn crate::collaborators::MemoryManager>,
    shutdown:      Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("tsrm-memory-initiator".to_owned())
        .spawn(move || {
            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                run_initiator_pass(&reports, memory_policy.as_ref());
                thread::sleep(INITIATOR_INTERVAL);
            }

            tracing::info!("memory initiator task exiting");
        })
        .expect("failed to spawn memory initiator thread")
}

fn run_initiator_pass(reports: &Arc<ReportTable>, memory_policy: &dyn crate::collaborators::MemoryManager) {
    let snapshot: Vec<TabletReport> = reports.lock().values().map(|(report, _)| report.clone()).collect();
    let recommended = memory_policy.recommend(&snapshot);

    for tablet_id in recommended {
        let handle = {
            let table = reports.lock();
            table.get(&tablet_id).and_then(|(_, weak)| weak.upgrade())
        };

        let Some(handle) = handle else {
            tracing::warn!(tablet = %tablet_id, "manager implementation might be misbehaving: recommended an unknown tablet");
            continue;
        };

        let initiated = handle.tablet().initiate_minor_compaction(MinorCompactionReason::System);
        if initiated {
            continue;
        }

        if handle.tablet().is_closed() {
            let mut table = reports.lock();
            if let Some((_, stored_weak)) = table.get(&tablet_id) {
                let same_instance = stored_weak
                    .upgrade()
                    .is_some_and(|stored| Arc::ptr_eq(&stored, &handle));
                if same_instance {
                    table.remove(&tablet_id);
                    tracing::info!(tablet = %tablet_id, "removed closed tablet's stale report");
                }
            }
        } else {
            tracing::info!(tablet = %tablet_id, "tablet declined minor compaction");
        }
    }
}
