/*!
Broadcast signalling for log appends.

Every successful WAL append broadcasts on a condition variable so that tailing consumers can
sleep between records instead of polling. Waiters always re-check the engine's current
offset after waking; spurious wakeups are therefore harmless and no waiter can observe an
offset regression (offsets only ever grow).
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// The condition variable pair that append broadcasts go through.
pub(crate) struct AppendSignal {
    /// Guards the sleep/wake handshake. No data lives under it; waiters re-check engine
    /// state after every wake.
    pub(crate) mutex: Mutex<()>,

    /// Broadcast on every append, on cancellation, and once on shutdown.
    pub(crate) condvar: Condvar,
}

/// Crate-only methods
impl AppendSignal {
    pub(crate) fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /**
    Wake every current waiter.

    The handshake mutex is taken briefly so a waiter that has checked the offset but not yet
    parked cannot miss the notification.
    */
    pub(crate) fn broadcast(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/**
A handle for cancelling waits on [`Engine::wait_for_append`](crate::Engine::wait_for_append)
from another thread.

Cancelling flips a flag and broadcasts on the append signal, so affected waiters wake
immediately rather than at their next timeout.
*/
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    signal: Arc<AppendSignal>,
}

/// Crate-only methods
impl CancelToken {
    pub(crate) fn new(signal: Arc<AppendSignal>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            signal,
        }
    }
}

/// Public methods
impl CancelToken {
    /// Cancel every wait that was given this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.signal.broadcast();
    }

    /// True if [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
