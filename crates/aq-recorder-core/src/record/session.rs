use crate::{
    BufferPool, CaptureBackend, CaptureCallback, CaptureEngine, CodecId, ContainerFactory,
    CoreResult, DEFAULT_BUFFER_DURATION_SECS, DEFAULT_RECORD_BUFFERS, MIN_RECORD_BUFFERS,
    RecordState, RecorderError, StopReason, StopSignal, StreamFormat,
    compute_record_buffer_size,
};

use std::{path::PathBuf, sync::Arc};

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What to record and how to buffer it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Destination file. Replaced if it exists.
    pub output_path: PathBuf,
    /// Codec to request from the backend.
    pub codec: CodecId,
    /// Channels per frame to request.
    pub channels: u32,
    /// Buffers kept in flight, at least [`MIN_RECORD_BUFFERS`].
    pub buffer_count: usize,
    /// Seconds of audio per buffer.
    pub buffer_duration_secs: f64,
}

impl SessionConfig {
    /// Stereo linear PCM into `output_path` with the default buffering.
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            codec: CodecId::LinearPcm,
            channels: 2,
            buffer_count: DEFAULT_RECORD_BUFFERS,
            buffer_duration_secs: DEFAULT_BUFFER_DURATION_SECS,
        }
    }

    /// Checks every value before any device is touched.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid value.
    #[track_caller]
    pub fn validate(&self) -> CoreResult<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(RecorderError::configuration(
                "validate_session",
                "output path is empty",
            ));
        }
        if self.channels == 0 {
            return Err(RecorderError::configuration(
                "validate_session",
                "channel count must be positive",
            ));
        }
        if self.buffer_count < MIN_RECORD_BUFFERS {
            return Err(RecorderError::configuration(
                "validate_session",
                format!(
                    "at least {} record buffers are required, got {}",
                    MIN_RECORD_BUFFERS, self.buffer_count
                ),
            ));
        }
        if !self.buffer_duration_secs.is_finite() || self.buffer_duration_secs <= 0.0 {
            return Err(RecorderError::configuration(
                "validate_session",
                format!(
                    "buffer duration must be positive, got {}",
                    self.buffer_duration_secs
                ),
            ));
        }
        Ok(())
    }
}

/// Outcome of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    /// Identifier used in every log line of the session.
    pub session_id: Uuid,
    /// File that was written.
    pub path: PathBuf,
    /// Format confirmed by the engine and written to the file.
    pub format: StreamFormat,
    /// Capacity of each record buffer.
    pub buffer_byte_size: usize,
    /// Buffers primed.
    pub buffer_count: usize,
    /// Packets in the file.
    pub packets_written: u64,
    /// Filled buffers delivered to the callback.
    pub callbacks: u64,
    /// Times the cookie was stored in the file.
    pub cookie_writes: u32,
    /// What ended the recording.
    pub stop_reason: StopReason,
}

/// What `drive` learned before teardown.
struct Progress {
    format: StreamFormat,
    buffer_byte_size: usize,
    buffer_count: usize,
    cookie_writes: u32,
    stop_reason: StopReason,
}

/// Runs one recording session from format negotiation to file close.
///
/// # Lifecycle
///
/// 1. Negotiate the format and build the engine around a [`CaptureCallback`].
/// 2. Create the container with the engine-confirmed format.
/// 3. Store the encoder cookie, if any.
/// 4. Size the buffers and prime the pool.
/// 5. Start the engine and block on the [`StopSignal`].
/// 6. Stop the engine (draining in-flight buffers), store the cookie again
///    if the encoder changed it.
/// 7. Dispose the engine, then close the container.
///
/// Any failure ends the session; the engine and container are still
/// released in that order.
pub struct SessionController<'a> {
    backend: &'a dyn CaptureBackend,
    containers: &'a dyn ContainerFactory,
    config: SessionConfig,
    session_id: Uuid,
}

impl<'a> SessionController<'a> {
    /// Prepares a session; nothing is touched until [`run`](Self::run).
    pub fn new(
        backend: &'a dyn CaptureBackend,
        containers: &'a dyn ContainerFactory,
        config: SessionConfig,
    ) -> Self {
        Self {
            backend,
            containers,
            config,
            session_id: Uuid::new_v4(),
        }
    }

    /// Identifier of this session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Configuration the session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Records until `stop` fires and returns what was written.
    ///
    /// # Errors
    ///
    /// Returns the first collaborator failure, or the fault the capture
    /// callback recorded.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub fn run(&self, stop: &StopSignal) -> CoreResult<RecordingSummary> {
        self.config.validate()?;

        let state = Arc::new(RecordState::new(stop.clone()));

        let format = self.negotiate_format()?;
        let mut engine = self
            .backend
            .create_input_engine(&format, CaptureCallback::new(Arc::clone(&state)))?;

        let outcome = self.drive(engine.as_mut(), &state, stop);

        // Callbacks write into the open container, so the engine goes first.
        engine.dispose();
        state.mark_closed();
        let closed = close_output(&state);

        let progress = match outcome {
            Ok(progress) => progress,
            Err(e) => {
                if let Err(close_error) = closed {
                    warn!(error = %close_error, "Container close failed during teardown");
                }
                error!(error = %e, operation = e.operation(), "Recording session failed");
                return Err(e);
            }
        };

        if let Some(fault) = state.take_fault() {
            if let Err(close_error) = closed {
                warn!(error = %close_error, "Container close failed during teardown");
            }
            error!(error = %fault, "Recording session ended by capture fault");
            return Err(fault);
        }

        closed?;

        let summary = RecordingSummary {
            session_id: self.session_id,
            path: self.config.output_path.clone(),
            format: progress.format,
            buffer_byte_size: progress.buffer_byte_size,
            buffer_count: progress.buffer_count,
            packets_written: state.write_cursor(),
            callbacks: state.callbacks(),
            cookie_writes: progress.cookie_writes,
            stop_reason: progress.stop_reason,
        };

        info!(
            path = ?summary.path,
            packets = summary.packets_written,
            callbacks = summary.callbacks,
            stop_reason = %summary.stop_reason,
            "Recording session complete"
        );

        Ok(summary)
    }

    /// Device sample rate, then backend completion of the partial format.
    fn negotiate_format(&self) -> CoreResult<StreamFormat> {
        let mut partial = StreamFormat::partial(self.config.codec, self.config.channels);
        partial.sample_rate = self.backend.default_input_sample_rate()?;

        let format = self.backend.complete_format(partial)?;

        debug!(?format, "Format negotiated");

        Ok(format)
    }

    fn drive(
        &self,
        engine: &mut dyn CaptureEngine,
        state: &RecordState,
        stop: &StopSignal,
    ) -> CoreResult<Progress> {
        let format = engine.confirmed_format()?;

        let container = self
            .containers
            .create(&self.config.output_path, &format, true)?;
        state.install_output(container);

        let mut cookie_writes = 0;
        let initial_cookie = engine.cookie()?;
        if store_cookie(state, &initial_cookie)? {
            cookie_writes += 1;
        }

        let buffer_byte_size =
            compute_record_buffer_size(&format, &*engine, self.config.buffer_duration_secs)?;
        let mut pool = BufferPool::new(self.config.buffer_count, buffer_byte_size)?;
        pool.prime(engine)?;

        state.begin_running();
        if let Err(e) = engine.start() {
            state.end_running();
            return Err(e);
        }

        info!(
            path = ?self.config.output_path,
            codec = %format.codec,
            sample_rate = format.sample_rate,
            channels = format.channels_per_frame,
            buffer_bytes = buffer_byte_size,
            buffer_count = pool.buffer_count(),
            "Recording started"
        );

        let stop_reason = stop.wait();

        info!(%stop_reason, "Stopping recording");
        state.end_running();
        engine.stop()?;

        let final_cookie = engine.cookie()?;
        if final_cookie != initial_cookie && store_cookie(state, &final_cookie)? {
            cookie_writes += 1;
        }

        Ok(Progress {
            format,
            buffer_byte_size,
            buffer_count: pool.primed(),
            cookie_writes,
            stop_reason,
        })
    }
}

/// Closes the output, then checks it holds every packet the callback wrote.
fn close_output(state: &RecordState) -> CoreResult<()> {
    let Some(container) = state.take_output() else {
        return Ok(());
    };

    let held = container.packet_count();
    container.close()?;

    let written = state.write_cursor();
    if held != written {
        return Err(RecorderError::io(
            "close_container",
            format!(
                "container holds {} packets but {} were written",
                held, written
            ),
        ));
    }

    Ok(())
}

/// Copies a non-empty cookie into the container. Returns whether it did.
fn store_cookie(state: &RecordState, cookie: &[u8]) -> CoreResult<bool> {
    if cookie.is_empty() {
        return Ok(false);
    }

    state.with_output("set_cookie", |output| output.set_cookie(cookie))?;
    debug!(cookie_bytes = cookie.len(), "Cookie stored");

    Ok(true)
}

impl std::fmt::Debug for SessionController<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("config", &self.config)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

