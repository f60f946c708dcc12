mod buffer;
mod callback;
mod format;
mod session;
mod state;
mod stop;

pub use {
    buffer::{
        BufferPool, CaptureBuffer, DEFAULT_BUFFER_DURATION_SECS, DEFAULT_RECORD_BUFFERS,
        MIN_RECORD_BUFFERS, compute_record_buffer_size,
    },
    callback::CaptureCallback,
    format::{CodecId, PacketDescription, StreamFormat, format_flags},
    session::{RecordingSummary, SessionConfig, SessionController},
    state::{RecordState, SessionPhase},
    stop::{StopReason, StopSignal},
};
