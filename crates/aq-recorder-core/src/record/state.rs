use crate::{CoreResult, OutputContainer, RecorderError, StopReason, StopSignal};

use std::sync::{
    Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tracing::{error, warn};

/// Where a session is in its life, as seen by the capture callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Buffers submitted, engine not started yet.
    Priming,
    /// Callbacks write and resubmit.
    Running,
    /// Stop requested: in-flight buffers are written but not resubmitted.
    Draining,
    /// Engine disposed; no callback can fire.
    Closed,
    /// A callback failed; the session is ending with an error.
    Faulted,
}

/// The record shared between the controlling thread and the callback.
///
/// Each field has a single writer:
/// - `write_cursor` and `callbacks`: the capture callback.
/// - `running`, `started`, `closed`: the session controller.
/// - `fault`: the capture callback, read by the controller after the engine
///   has stopped.
///
/// The output container sits behind a mutex because it crosses threads, but
/// the callback only holds it while the controller is blocked, so it is
/// never contended.
pub struct RecordState {
    running: AtomicBool,
    started: AtomicBool,
    closed: AtomicBool,
    write_cursor: AtomicU64,
    callbacks: AtomicU64,
    output: Mutex<Option<Box<dyn OutputContainer>>>,
    fault: Mutex<Option<RecorderError>>,
    stop: StopSignal,
}

impl RecordState {
    /// A fresh record in the [`SessionPhase::Priming`] phase.
    ///
    /// `stop` is triggered with [`StopReason::Fault`] when a fault is recorded.
    pub fn new(stop: StopSignal) -> Self {
        Self {
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            write_cursor: AtomicU64::new(0),
            callbacks: AtomicU64::new(0),
            output: Mutex::new(None),
            fault: Mutex::new(None),
            stop,
        }
    }

    /// Whether filled buffers should go back to the engine.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Index of the next packet to write.
    pub fn write_cursor(&self) -> u64 {
        self.write_cursor.load(Ordering::Acquire)
    }

    /// Callback invocations so far.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Acquire)
    }

    /// Whether a callback has recorded a fatal error.
    pub fn has_fault(&self) -> bool {
        self.lock_fault().is_some()
    }

    /// The current phase.
    pub fn phase(&self) -> SessionPhase {
        if self.has_fault() {
            SessionPhase::Faulted
        } else if self.closed.load(Ordering::Acquire) {
            SessionPhase::Closed
        } else if self.is_running() {
            SessionPhase::Running
        } else if self.started.load(Ordering::Acquire) {
            SessionPhase::Draining
        } else {
            SessionPhase::Priming
        }
    }

    pub(crate) fn begin_running(&self) {
        self.started.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    pub(crate) fn end_running(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn count_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn advance_cursor(&self, packets: u32) {
        self.write_cursor
            .fetch_add(u64::from(packets), Ordering::AcqRel);
    }

    pub(crate) fn install_output(&self, container: Box<dyn OutputContainer>) {
        *self.lock_output() = Some(container);
    }

    pub(crate) fn take_output(&self) -> Option<Box<dyn OutputContainer>> {
        self.lock_output().take()
    }

    /// Runs `f` against the open container.
    #[track_caller]
    pub(crate) fn with_output<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn OutputContainer) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut guard = self.lock_output();
        match guard.as_deref_mut() {
            Some(container) => f(container),
            None => Err(RecorderError::io(operation, "output container is not open")),
        }
    }

    /// Keeps the first fault and fires the stop signal.
    pub(crate) fn record_fault(&self, fault: RecorderError) {
        {
            let mut slot = self.lock_fault();
            if slot.is_some() {
                warn!(error = %fault, "Additional capture fault ignored");
                return;
            }
            error!(error = %fault, "Capture fault, stopping session");
            *slot = Some(fault);
        }

        self.stop.trigger(StopReason::Fault);
    }

    pub(crate) fn take_fault(&self) -> Option<RecorderError> {
        self.lock_fault().take()
    }

    fn lock_output(&self) -> MutexGuard<'_, Option<Box<dyn OutputContainer>>> {
        self.output.lock().unwrap_or_else(|e| {
            error!("Output container lock poisoned, recovering: {}", e);
            e.into_inner()
        })
    }

    fn lock_fault(&self) -> MutexGuard<'_, Option<RecorderError>> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordState")
            .field("phase", &self.phase())
            .field("write_cursor", &self.write_cursor())
            .field("callbacks", &self.callbacks())
            .finish_non_exhaustive()
    }
}
