use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer};

/// A live handle to server configuration. Values are read on demand; implementations must never
/// block on I/O from [`snapshot`](ConfigSource::snapshot).
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> Arc<ConfigSnapshot>;
}

/// One fully-populated, immutable copy of every configuration value the core consumes.
///
/// Deserializable from any serde-compatible format (TOML, JSON, ...); the embedding application
/// picks the format and loads it, then hands the result to [`SharedConfig::new`] or
/// [`SharedConfig::reload`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigSnapshot {
    /// Ceiling `M` on total in-memory write-buffer bytes across all tablets.
    pub max_memtable_bytes: u64,
    pub native_map_enabled: bool,
    pub default_block_size: u64,
    pub data_cache_bytes:   u64,
    pub index_cache_bytes:  u64,
    pub max_open_scan_files: usize,

    pub minc_maxconcurrent:                usize,
    pub majc_maxconcurrent:                 usize,
    pub migrate_maxconcurrent:              usize,
    pub readahead_maxconcurrent:            usize,
    pub metadata_readahead_maxconcurrent:   usize,

    #[serde(deserialize_with = "duration_from_millis")]
    pub rpc_timeout: Duration,

    pub compaction_strategy_class: String,
    #[serde(default)]
    pub compaction_strategy_options: HashMap<String, String>,

    #[serde(deserialize_with = "duration_from_millis")]
    pub idle_compact_threshold: Duration,

    pub memory_manager_class: String,
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// The shipped [`ConfigSource`]: an [`Arc<ConfigSnapshot>`] swapped wholesale under a
/// [`parking_lot::RwLock`]. A reader clones the `Arc` under a short read lock, so it always
/// observes one complete snapshot, never a mix of values from before and after a concurrent
/// [`reload`](Self::reload).
#[derive(Debug)]
pub struct SharedConfig {
    inner: RwLock<Arc<ConfigSnapshot>>,
}

impl SharedConfig {
    #[must_use]
    pub fn new(initial: ConfigSnapshot) -> Self {
        Self { inner: RwLock::new(Arc::new(initial)) }
    }

    /// Atomically replace the live snapshot.
    pub fn reload(&self, new_snapshot: ConfigSnapshot) {
        *self.inner.write() = Arc::new(new_snapshot);
    }
}

impl ConfigSource for SharedConfig {
    fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.inner.read())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;

    fn sample(max_memtable_bytes: u64) -> ConfigSnapshot {
        ConfigSnapshot {
            max_memtable_bytes,
            native_map_enabled: true,
            default_block_size: 65_536,
            data_cache_bytes: 1 << 20,
            index_cache_bytes: 1 << 20,
            max_open_scan_files: 100,
            minc_maxconcurrent: 4,
            majc_maxconcurrent: 3,
            migrate_maxconcurrent: 1,
            readahead_maxconcurrent: 16,
            metadata_readahead_maxconcurrent: 8,
            rpc_timeout: Duration::from_secs(30),
            compaction_strategy_class: "default".to_owned(),
            compaction_strategy_options: HashMap::new(),
            idle_compact_threshold: Duration::from_secs(3600),
            memory_manager_class: "default".to_owned(),
        }
    }

    #[test]
    fn reload_replaces_the_whole_snapshot() {
        let config = SharedConfig::new(sample(1_000));
        assert_eq!(config.snapshot().max_memtable_bytes, 1_000);

        config.reload(sample(2_000));
        assert_eq!(config.snapshot().max_memtable_bytes, 2_000);
    }

    #[test]
    fn concurrent_reads_never_see_a_torn_snapshot() {
        let config = Arc::new(SharedConfig::new(sample(1_000)));
        let barrier = Arc::new(Barrier::new(2));

        let reader_config = Arc::clone(&config);
        let reader_barrier = Arc::clone(&barrier);
        let reader = thread::spawn(move || {
            reader_barrier.wait();
            for _ in 0..1_000 {
                let snapshot = reader_config.snapshot();
                assert!(snapshot.max_memtable_bytes == 1_000 || snapshot.max_memtable_bytes == 2_000);
            }
        });

        barrier.wait();
        for i in 0..1_000 {
            config.reload(sample(if i % 2 == 0 { 2_000 } else { 1_000 }));
        }

        reader.join().unwrap();
    }
}
