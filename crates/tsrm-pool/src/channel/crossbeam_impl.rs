use std::time::Duration;

pub(crate) use crossbeam_channel::{Receiver, Sender};
use crossbeam_channel::{RecvError, RecvTimeoutError};

use super::RecvTimeout;


pub(crate) fn unbounded_channel<T>() -> (Sender<T>, Receiver<T>) {
    crossbeam_channel::unbounded()
}

/// Blocks until a task arrives, with no deadline.
pub(crate) fn recv<T>(receiver: &Receiver<T>) -> Result<T, RecvTimeout> {
    receiver.recv().map_err(|RecvError| RecvTimeout::Disconnected)
}

pub(crate) fn recv_timeout<T>(receiver: &Receiver<T>, timeout: Duration) -> Result<T, RecvTimeout> {
    receiver.recv_timeout(timeout).map_err(|err| match err {
        RecvTimeoutError::Timeout      => RecvTimeout::TimedOut,
        RecvTimeoutError::Disconnected => RecvTimeout::Disconnected,
    })
}
