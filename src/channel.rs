//! Handoffs between the session worker and the rest of the host

use std::sync::{Arc, Condvar, Mutex, PoisonError, TryLockError};
use std::time::Duration;

use crate::session::SessionParameters;

#[derive(Debug, Default)]
struct Slot {
    start_requested: bool,
    params: Option<SessionParameters>,
}

/// Single-slot handoff of session parameters from a producer to the session worker
///
/// The last write wins. The worker clears the slot when it leaves AwaitingStart.
#[derive(Debug, Clone, Default)]
pub struct ConfigChannel {
    slot: Arc<Mutex<Slot>>,
}

impl ConfigChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit parameters and ask the worker to run one cycle with them
    pub fn request_start(&self, params: SessionParameters) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.start_requested = true;
        slot.params = Some(params);
    }

    /// Withdraw a pending request
    pub fn cancel(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Slot::default();
    }

    /// Non-blocking, non-destructive look at a pending start request
    ///
    /// Returns `None` when nothing is pending or the producer holds the lock.
    pub fn peek(&self) -> Option<SessionParameters> {
        let slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        if slot.start_requested {
            slot.params.clone()
        } else {
            None
        }
    }

    /// Consume the pending request, clearing the start flag
    pub fn take(&self) -> Option<SessionParameters> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let requested = std::mem::take(&mut slot.start_requested);
        let params = slot.params.take();
        if requested { params } else { None }
    }
}

/// Cooperative shutdown flag whose waits wake early when it is raised
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (stopped, wake) = &*self.inner;
        *stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` unless stopped first; returns whether the signal is raised
    pub fn wait(&self, timeout: Duration) -> bool {
        let (stopped, wake) = &*self.inner;
        let guard = stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wake
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}
