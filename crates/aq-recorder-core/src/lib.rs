//! AQ-Recorder Core Library
//!
//! Records the default input device into a Core Audio Format file through a
//! small fixed pool of recycled capture buffers. The capture engine fills
//! buffers asynchronously; a serial delivery context hands each filled
//! buffer to a [`CaptureCallback`], which writes its packets in order and
//! resubmits the buffer while the session is running.
//!
//! # Example
//!
//! ```no_run
//! use aq_recorder_core::{
//!     CafFactory, CoreResult, CpalBackend, SessionConfig, SessionController, StopReason,
//!     StopSignal,
//! };
//!
//! use std::{thread, time::Duration};
//!
//! fn main() -> CoreResult<()> {
//!     let backend = CpalBackend::default_input()?;
//!     let config = SessionConfig::new("output.caf");
//!     let stop = StopSignal::new();
//!
//!     let timer = stop.clone();
//!     thread::spawn(move || {
//!         thread::sleep(Duration::from_secs(3));
//!         timer.trigger(StopReason::DurationElapsed);
//!     });
//!
//!     let summary = SessionController::new(&backend, &CafFactory, config).run(&stop)?;
//!     println!("Wrote {} packets", summary.packets_written);
//!     Ok(())
//! }
//! ```

mod container;
mod engine;
mod error;
mod record;

pub use {
    container::{CafContainer, CafFactory, ContainerFactory, OutputContainer},
    engine::{BufferQueue, CaptureBackend, CaptureEngine, CpalBackend, CpalEngine},
    error::{RecorderError, Result as CoreResult},
    record::{
        BufferPool, CaptureBuffer, CaptureCallback, CodecId, DEFAULT_BUFFER_DURATION_SECS,
        DEFAULT_RECORD_BUFFERS, MIN_RECORD_BUFFERS, PacketDescription, RecordState,
        RecordingSummary, SessionConfig, SessionController, SessionPhase, StopReason, StopSignal,
        StreamFormat, compute_record_buffer_size, format_flags,
    },
};
