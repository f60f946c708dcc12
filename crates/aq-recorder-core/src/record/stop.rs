use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use tracing::{debug, error};

/// Why a session was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user asked for the recording to end.
    UserRequest,
    /// The process received an interrupt.
    Interrupted,
    /// A configured maximum duration elapsed.
    DurationElapsed,
    /// The capture callback hit a fatal error.
    Fault,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UserRequest => "user request",
            Self::Interrupted => "interrupted",
            Self::DurationElapsed => "duration elapsed",
            Self::Fault => "capture fault",
        };
        f.write_str(text)
    }
}

#[derive(Default)]
struct StopInner {
    reason: Mutex<Option<StopReason>>,
    triggered: Condvar,
}

/// One-shot "stop recording" latch.
///
/// Clones share the latch. Any trigger (console, OS signal, timer, the
/// capture callback) calls [`trigger`](Self::trigger); the controlling
/// thread blocks in [`wait`](Self::wait). Only the first reason is kept.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    /// Creates an untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Returns `false` if it had already fired.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let mut slot = self.lock();

        if slot.is_some() {
            debug!(%reason, "Stop already requested");
            return false;
        }

        *slot = Some(reason);
        self.inner.triggered.notify_all();
        debug!(%reason, "Stop requested");

        true
    }

    /// Blocks until the signal fires and returns the first reason.
    pub fn wait(&self) -> StopReason {
        let mut slot = self.lock();

        loop {
            if let Some(reason) = *slot {
                return reason;
            }
            slot = self.inner.triggered.wait(slot).unwrap_or_else(|e| {
                error!("Stop signal lock poisoned, recovering: {}", e);
                e.into_inner()
            });
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StopReason> {
        let slot = self.lock();

        let (slot, _) = self
            .inner
            .triggered
            .wait_timeout_while(slot, timeout, |reason| reason.is_none())
            .unwrap_or_else(|e| {
                error!("Stop signal lock poisoned, recovering: {}", e);
                e.into_inner()
            });

        *slot
    }

    /// The reason the signal fired with, if it has.
    pub fn reason(&self) -> Option<StopReason> {
        *self.lock()
    }

    /// Whether the signal has fired.
    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<StopReason>> {
        // The slot is a plain Option, so a poisoned lock still holds valid data.
        self.inner.reason.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("reason", &self.reason())
            .finish()
    }
}
