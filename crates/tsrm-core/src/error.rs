use std::time::Duration;

use thiserror::Error;

use crate::tablet_id::TabletId;

/// The closed set of errors a caller of the resource manager's public surface may observe.
///
/// Failures the core swallows internally (strategy I/O failures, policy misbehavior,
/// interrupted waits, controller-loop errors) are logged via `tracing` at their call site and
/// never reach this type — see [`crate::memory_controller`].
#[derive(Error, Debug)]
pub enum ResourceManagerError {
    /// Startup or registry misconfiguration; fatal.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A handle was used after [`close`](crate::handle::TabletHandle::close) already succeeded
    /// on it.
    #[error("tablet {0} is already closed")]
    AlreadyClosed(TabletId),

    /// `close` was called while scan files were still reserved against the handle.
    #[error("tablet {0} still has open scan files reserved")]
    OpenFilesStillReserved(TabletId),

    /// `wait_until_commits_enabled` exceeded the configured RPC timeout while the gate was held.
    #[error("commit hold exceeded the {0:?} RPC timeout")]
    HoldTimeout(Duration),
}

/// Fatal configuration problems detected during
/// [`ResourceManager::new`](crate::manager::ResourceManager::new).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The native map is disabled, so the JVM-style managed-memory caches and the memtable
    /// ceiling all compete for the same process heap.
    #[error(
        "native map disabled and max_memtable_bytes ({max_memtable_bytes}) + data_cache_bytes \
         ({data_cache_bytes}) + index_cache_bytes ({index_cache_bytes}) exceeds process_max_heap \
         ({process_max_heap})"
    )]
    CachesExceedHeap {
        max_memtable_bytes: u64,
        data_cache_bytes:   u64,
        index_cache_bytes:  u64,
        process_max_heap:   u64,
    },

    /// Two pools in the catalogue were registered under the same name.
    #[error("a pool named {0:?} is already registered")]
    DuplicatePoolName(String),
}
