use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use thiserror::Error;

use crate::config::ConfigSnapshot;
use crate::report::TabletReport;
use crate::tablet_id::TabletId;

/// Why a major compaction is being requested, passed through to [`CompactionStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompactionReason {
    /// Requested directly by a user/administrator; always compacts.
    User,
    /// The tablet has been idle past its configured threshold.
    Idle,
    /// Routine system-driven compaction.
    System,
}

/// Why [`Tablet::initiate_minor_compaction`] was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MinorCompactionReason {
    /// Invoked by the memory controller's initiator task.
    System,
    /// Invoked directly by a user/administrator.
    User,
}

/// A pluggable policy deciding, from the current per-tablet report snapshot, which tablets
/// should be minor-compacted next.
///
/// Selected at startup by class name through a [`MemoryManagerRegistry`]; never loaded
/// dynamically. Implementations needing state across calls (the trait's methods all take
/// `&self`, since instances are shared behind an `Arc`) should use their own interior
/// mutability.
pub trait MemoryManager: Send + Sync {
    fn init(&self, config: &ConfigSnapshot);

    /// A possibly-empty, ordered list of tablets to minor-compact, most urgent first.
    fn recommend(&self, reports: &[TabletReport]) -> Vec<TabletId>;

    fn tablet_closed(&self, id: &TabletId);
}

/// A per-decision strategy answering "should this tablet undergo a major compaction right now,
/// given its current file set". A fresh instance is constructed per decision (see
/// [`crate::handle::TabletHandle::needs_major_compaction`]).
pub trait CompactionStrategy: Send + Sync {
    fn init(&mut self, options: &HashMap<String, String>);

    fn should_compact(&self, request: &MajorCompactionRequest) -> Result<bool, StrategyIoError>;
}

/// The request passed to [`CompactionStrategy::should_compact`].
#[derive(Debug, Clone)]
pub struct MajorCompactionRequest {
    pub tablet_id: TabletId,
    pub reason:    CompactionReason,
    pub files:     Vec<String>,
    pub config:    Arc<ConfigSnapshot>,
}

/// I/O failure surfaced by a [`CompactionStrategy`]. Always swallowed by the caller and treated
/// as "do not compact" — see §4.6's conservative-false rule.
#[derive(Debug, Clone, Error)]
#[error("compaction strategy I/O failure: {0}")]
pub struct StrategyIoError(pub String);

/// The tablet-side surface the memory controller calls back into. Implemented by the real
/// tablet object, external to this crate.
pub trait Tablet: Send + Sync {
    fn initiate_minor_compaction(&self, reason: MinorCompactionReason) -> bool;
    fn is_closed(&self) -> bool;
    fn get_extent(&self) -> TabletId;
}

/// Scan-time file-descriptor reservation, obtained per tablet.
pub trait FileManager: Send + Sync {
    fn new_scan_file_manager(&self, id: &TabletId) -> Box<dyn ScanFileManager>;
}

/// A handle to the reserved scan files for one tablet's read path.
pub trait ScanFileManager: Send + Sync {
    fn reserved_count(&self) -> usize;
}

/// Maps a config-provided class name to a constructor for a [`MemoryManager`] implementation.
///
/// Populated at startup from code, never from a class path loaded dynamically.
#[derive(Default)]
pub struct MemoryManagerRegistry {
    constructors: HashMap<String, fn() -> Box<dyn MemoryManager>>,
}

impl MemoryManagerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_name: impl Into<String>, constructor: fn() -> Box<dyn MemoryManager>) {
        self.constructors.insert(class_name.into(), constructor);
    }

    #[must_use]
    pub fn construct(&self, class_name: &str) -> Option<Box<dyn MemoryManager>> {
        self.constructors.get(class_name).map(|constructor| constructor())
    }
}

impl Debug for MemoryManagerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManagerRegistry")
            .field("registered", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Maps a config-provided class name to a constructor for a [`CompactionStrategy`]
/// implementation.
#[derive(Default)]
pub struct CompactionStrategyRegistry {
    constructors: HashMap<String, fn() -> Box<dyn CompactionStrategy>>,
}

impl CompactionStrategyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_name: impl Into<String>, constructor: fn() -> Box<dyn CompactionStrategy>) {
        self.constructors.insert(class_name.into(), constructor);
    }

    #[must_use]
    pub fn construct(&self, class_name: &str) -> Option<Box<dyn CompactionStrategy>> {
        self.constructors.get(class_name).map(|constructor| constructor())
    }
}

impl Debug for CompactionStrategyRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactionStrategyRegistry")
            .field("registered", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverCompact;

    impl MemoryManager for NeverCompact {
        fn init(&self, _config: &ConfigSnapshot) {}
        fn recommend(&self, _reports: &[TabletReport]) -> Vec<TabletId> {
            Vec::new()
        }
        fn tablet_closed(&self, _id: &TabletId) {}
    }

    #[test]
    fn registry_constructs_by_class_name() {
        let mut registry = MemoryManagerRegistry::new();
        registry.register("never-compact", || Box::new(NeverCompact));

        assert!(registry.construct("never-compact").is_some());
        assert!(registry.construct("unknown").is_none());
    }
}
