use thiserror::Error;


/// Errors produced while registering pools or submitting tasks to them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// [`PoolRegistry::register`](crate::PoolRegistry::register) was called with a name that is
    /// already present in the registry. The registry is left unchanged.
    #[error("a pool named {0:?} is already registered")]
    DuplicateName(String),

    /// A task was submitted to a pool after it (or the registry that owns it) began shutting
    /// down.
    #[error("pool {0:?} is shut down and no longer accepts tasks")]
    ShuttingDown(String),
}
