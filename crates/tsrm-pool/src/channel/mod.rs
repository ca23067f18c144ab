use std::fmt::{Display, Formatter, Result as FmtResult};

cfg_if::cfg_if! {
    if #[cfg(feature = "crossbeam-channel")] {
        mod crossbeam_impl;
        pub(crate) use self::crossbeam_impl::*;
    } else {
        pub(crate) mod fallback_impl;
        pub(crate) use self::fallback_impl::*;
    }
}


/// Backend-independent reason a timed receive on a pool's task channel gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecvTimeout {
    /// No task arrived before the deadline.
    TimedOut,
    /// Every [`Sender`] for the channel was dropped.
    Disconnected,
}

impl Display for RecvTimeout {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::TimedOut     => write!(f, "timed out waiting for a task"),
            Self::Disconnected => write!(f, "every sender for the channel was dropped"),
        }
    }
}
