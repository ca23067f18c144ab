//! Named, bounded worker pools with FIFO and priority queue disciplines.
//!
//! This crate provides the two pool shapes used throughout a tablet-server resource manager:
//! a [`FifoPool`] for strictly-ordered background work (splits, assignments, migrations, minor
//! compactions) and a [`PriorityPool`] for rank-ordered work (major compactions, ranked by file
//! count). A [`PoolRegistry`] keeps every pool name-unique across both disciplines.

mod channel;
mod error;
mod priority_pool;
mod registry;
mod spec;
mod worker_pool;

pub use error::PoolError;
pub use priority_pool::PriorityPool;
pub use registry::PoolRegistry;
pub use spec::{PoolSpec, QueueDiscipline};
pub use worker_pool::FifoPool;

/// A unit of background work submitted to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;
