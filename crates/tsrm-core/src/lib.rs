//! Per-node memory management and background-activity scheduling for tablet servers.
//!
//! [`manager::ResourceManager`] is the entry point: it validates startup configuration, wires up
//! the named worker pools (via [`tsrm_pool`]), and spawns the memory controller's guard and
//! initiator tasks. Callers obtain one [`handle::TabletHandle`] per loaded tablet and report
//! memory usage and compaction need through it.

mod collaborators;
mod commit_hold;
mod config;
mod dispatcher;
mod error;
mod handle;
#[cfg(feature = "logging-init")]
mod logging;
mod manager;
mod memory_controller;
mod report;
mod tablet_id;

pub use collaborators::{
    CompactionReason, CompactionStrategy, CompactionStrategyRegistry, FileManager,
    MajorCompactionRequest, MemoryManager, MemoryManagerRegistry, MinorCompactionReason,
    ScanFileManager, StrategyIoError, Tablet,
};
pub use commit_hold::CommitHoldGate;
pub use config::{ConfigSnapshot, ConfigSource, SharedConfig};
pub use error::{ConfigurationError, ResourceManagerError};
pub use handle::TabletHandle;
#[cfg(feature = "logging-init")]
pub use logging::init_default as init_default_logging;
pub use manager::{ProcessMemoryInfo, ResourceManager};
pub use report::TabletReport;
pub use tablet_id::{TabletId, TabletKind};
