use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::ResourceManagerError;

#[derive(Debug)]
struct State {
    held:       bool,
    held_since: Option<Instant>,
}

/// Back-pressure gate: while held, [`wait_until_commits_enabled`](Self::wait_until_commits_enabled)
/// blocks writer threads until the guard task releases it or the RPC timeout elapses.
///
/// Transitions are driven only by the memory controller's guard task; everything else only
/// reads the state or waits on it.
#[derive(Debug)]
pub struct CommitHoldGate {
    state:    Mutex<State>,
    released: Condvar,
}

impl CommitHoldGate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state:    Mutex::new(State { held: false, held_since: None }),
            released: Condvar::new(),
        }
    }

    /// Engage the gate if it is not already held.
    pub fn hold(&self) {
        let mut state = self.state.lock();
        if !state.held {
            state.held = true;
            state.held_since = Some(Instant::now());
            tracing::info!("commit hold engaged");
        }
    }

    /// Release the gate if currently held, waking every waiter.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.held {
            let elapsed = state.held_since.map_or(Duration::ZERO, |since| since.elapsed());
            state.held = false;
            state.held_since = None;
            tracing::info!(elapsed_secs = elapsed.as_secs_f64(), "commit hold released");
            self.released.notify_all();
        }
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Seconds the gate has been held continuously, or zero if it is not currently held.
    #[must_use]
    pub fn hold_time(&self) -> Duration {
        let state = self.state.lock();
        if state.held {
            state.held_since.map_or(Duration::ZERO, |since| since.elapsed())
        } else {
            Duration::ZERO
        }
    }

    /// Block until the gate is released or `rpc_timeout` elapses, polling once a second.
    /// Spurious wakeups are tolerated: the condition is re-checked on every wakeup.
    pub fn wait_until_commits_enabled(&self, rpc_timeout: Duration) -> Result<(), ResourceManagerError> {
        let deadline = Instant::now() + rpc_timeout;
        let mut state = self.state.lock();

        while state.held {
            let now = Instant::now();
            if now >= deadline {
                return Err(ResourceManagerError::HoldTimeout(rpc_timeout));
            }

            let wait_for = (deadline - now).min(Duration::from_secs(1));
            self.released.wait_for(&mut state, wait_for);

            if state.held && Instant::now() >= deadline {
                return Err(ResourceManagerError::HoldTimeout(rpc_timeout));
            }
        }

        Ok(())
    }
}

impl Default for CommitHoldGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn wait_returns_immediately_when_not_held() {
        let gate = CommitHoldGate::new();
        assert!(gate.wait_until_commits_enabled(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn wait_times_out_while_held() {
        let gate = CommitHoldGate::new();
        gate.hold();
        let err = gate.wait_until_commits_enabled(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, ResourceManagerError::HoldTimeout(_)));
    }

    #[test]
    fn release_wakes_a_waiter() {
        let gate = Arc::new(CommitHoldGate::new());
        gate.hold();

        let waiter_gate = Arc::clone(&gate);
        let waiter = thread::spawn(move || {
            waiter_gate.wait_until_commits_enabled(Duration::from_secs(5))
        });

        thread::sleep(Duration::from_millis(50));
        gate.release();

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn hold_time_is_zero_when_not_held() {
        let gate = CommitHoldGate::new();
        assert_eq!(gate.hold_time(), Duration::ZERO);
    }

    #[test]
    fn double_hold_does_not_reset_held_since() {
        let gate = CommitHoldGate::new();
        gate.hold();
        thread::sleep(Duration::from_millis(30));
        gate.hold();
        assert!(gate.hold_time() >= Duration::from_millis(30));
    }
}
