use std::time::Duration;


/// The admission discipline used to order pending tasks within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueDiscipline {
    /// Tasks run in submission order.
    Fifo,
    /// Tasks run in order of a rank attached at submission time; greater rank runs first.
    /// Equal ranks fall back to submission order.
    Priority,
}

/// The static description of one named pool, as read from configuration at startup.
///
/// `core_threads` workers are kept alive indefinitely (even while idle); additional workers, up
/// to `max_threads`, are spawned on demand and exit after `keep_alive` of idleness. A pool whose
/// `core_threads` is `0` can shrink all the way down to no running workers.
#[derive(Debug, Clone)]
pub struct PoolSpec {
    pub name:          String,
    pub core_threads:  usize,
    pub max_threads:   usize,
    pub keep_alive:    Duration,
    pub discipline:    QueueDiscipline,
}

impl PoolSpec {
    /// A pool with a single, always-alive worker and no keep-alive timeout. Matches the
    /// catalogue entries with a fixed size of 1 and no stated keep-alive (e.g. `split`,
    /// `assignment`).
    #[must_use]
    pub fn fixed_single(name: impl Into<String>) -> Self {
        Self {
            name:         name.into(),
            core_threads: 1,
            max_threads:  1,
            keep_alive:   Duration::ZERO,
            discipline:   QueueDiscipline::Fifo,
        }
    }

    /// A pool sized from a config-driven maximum, with no minimum (min = 0, so it can fully
    /// idle down) and no keep-alive timeout beyond the default.
    #[must_use]
    pub fn config_driven(name: impl Into<String>, max_threads: usize) -> Self {
        Self {
            name:         name.into(),
            core_threads: 0,
            max_threads,
            keep_alive:   Duration::from_secs(60),
            discipline:   QueueDiscipline::Fifo,
        }
    }

    #[must_use]
    pub fn with_discipline(mut self, discipline: QueueDiscipline) -> Self {
        self.discipline = discipline;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_core_threads(mut self, core_threads: usize) -> Self {
        self.core_threads = core_threads;
        self
    }
}
