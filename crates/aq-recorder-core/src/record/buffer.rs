use crate::{CaptureEngine, CoreResult, RecorderError, StreamFormat};

use tracing::{debug, info, instrument};

/// Buffers kept in flight for a session unless configured otherwise.
pub const DEFAULT_RECORD_BUFFERS: usize = 5;

/// Fewer buffers than this lets the engine stall waiting for a free one.
pub const MIN_RECORD_BUFFERS: usize = 3;

/// Audio held by one buffer, in seconds.
pub const DEFAULT_BUFFER_DURATION_SECS: f64 = 0.5;

/// A fixed-capacity region the engine fills with captured packets.
///
/// Owned by exactly one party at a time: the engine while submitted, the
/// [`CaptureCallback`](crate::CaptureCallback) while it is being written out.
#[derive(Debug)]
pub struct CaptureBuffer {
    id: usize,
    capacity: usize,
    data: Vec<u8>,
}

impl CaptureBuffer {
    /// Allocates an empty buffer holding exactly `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns a resource error for a zero capacity or when memory cannot be
    /// reserved.
    #[track_caller]
    pub fn allocate(id: usize, capacity: usize) -> CoreResult<Self> {
        if capacity == 0 {
            return Err(RecorderError::resource(
                "allocate_buffer",
                "buffer capacity must be non-zero",
            ));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(capacity).map_err(|e| {
            RecorderError::resource("allocate_buffer", format!("{} bytes: {}", capacity, e))
        })?;

        Ok(Self { id, capacity, data })
    }

    /// Identifier assigned by the engine that allocated the buffer.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Byte capacity fixed at allocation.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// No bytes held.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes that still fit.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// The filled part of the buffer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Appends as much of `bytes` as fits and returns how many were taken.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.remaining());
        self.data.extend_from_slice(&bytes[..take]);
        take
    }

    /// Empties the buffer for reuse without releasing its memory.
    pub fn reset(&mut self) {
        self.data.clear();
    }
}

/// Computes the byte capacity of one record buffer.
///
/// Fixed frame sizes give an exact answer. For compressed formats the size
/// is `packets * max_packet_size`, where the packet count assumes one frame
/// per packet if the format does not say otherwise, and the maximum packet
/// size is asked from the engine when the format does not fix it.
///
/// # Errors
///
/// Returns a configuration error for a non-positive duration, an unresolved
/// sample rate, more packets than one write can report, a zero-sized result
/// or an overflow, and passes through any failure of the engine's packet
/// size query.
#[track_caller]
#[instrument(skip(format, engine), fields(codec = %format.codec, sample_rate = format.sample_rate))]
pub fn compute_record_buffer_size(
    format: &StreamFormat,
    engine: &dyn CaptureEngine,
    seconds: f64,
) -> CoreResult<usize> {
    const OPERATION: &str = "compute_record_buffer_size";

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(RecorderError::configuration(
            OPERATION,
            format!("buffer duration must be positive, got {}", seconds),
        ));
    }
    if !format.sample_rate.is_finite() || format.sample_rate <= 0.0 {
        return Err(RecorderError::configuration(
            OPERATION,
            format!("sample rate is not resolved: {}", format.sample_rate),
        ));
    }

    let frames = (seconds * format.sample_rate).ceil();
    if frames > u64::MAX as f64 {
        return Err(RecorderError::configuration(
            OPERATION,
            "frame count overflows",
        ));
    }
    let frames = frames as u64;

    let packets = if format.frames_per_packet > 0 {
        frames / u64::from(format.frames_per_packet)
    } else {
        // Worst case: one frame in every packet.
        frames
    };
    if packets > u64::from(u32::MAX) {
        return Err(RecorderError::configuration(
            OPERATION,
            format!(
                "a buffer of {} frames holds more than {} packets",
                frames,
                u32::MAX
            ),
        ));
    }

    let bytes = if format.bytes_per_frame > 0 {
        frames.checked_mul(u64::from(format.bytes_per_frame))
    } else {
        let max_packet_size = if format.bytes_per_packet > 0 {
            format.bytes_per_packet
        } else {
            engine.max_output_packet_size()?
        };

        packets.max(1).checked_mul(u64::from(max_packet_size))
    };

    let bytes = bytes
        .and_then(|b| usize::try_from(b).ok())
        .ok_or_else(|| RecorderError::configuration(OPERATION, "buffer size overflows"))?;

    if bytes == 0 {
        return Err(RecorderError::configuration(
            OPERATION,
            "format yields a zero-byte buffer",
        ));
    }

    debug!(frames, buffer_bytes = bytes, "Record buffer sized");

    Ok(bytes)
}

/// The fixed set of buffers a session keeps in flight.
///
/// Only the count and size live here; the buffers themselves move between
/// the engine and the callback.
#[derive(Debug)]
pub struct BufferPool {
    buffer_count: usize,
    buffer_byte_size: usize,
    primed: usize,
}

impl BufferPool {
    /// Describes a pool of `buffer_count` buffers of `buffer_byte_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when fewer than [`MIN_RECORD_BUFFERS`]
    /// are requested or the size is zero.
    #[track_caller]
    pub fn new(buffer_count: usize, buffer_byte_size: usize) -> CoreResult<Self> {
        if buffer_count < MIN_RECORD_BUFFERS {
            return Err(RecorderError::configuration(
                "buffer_pool",
                format!(
                    "at least {} record buffers are required, got {}",
                    MIN_RECORD_BUFFERS, buffer_count
                ),
            ));
        }
        if buffer_byte_size == 0 {
            return Err(RecorderError::configuration(
                "buffer_pool",
                "buffer size must be non-zero",
            ));
        }

        Ok(Self {
            buffer_count,
            buffer_byte_size,
            primed: 0,
        })
    }

    /// Allocates every buffer and hands it to the engine.
    ///
    /// The first failure aborts priming; buffers already submitted stay with
    /// the engine and are released when it is disposed.
    ///
    /// # Errors
    ///
    /// Returns the engine's allocation or submission error.
    #[instrument(skip(self, engine), fields(buffer_count = self.buffer_count, buffer_bytes = self.buffer_byte_size))]
    pub fn prime(&mut self, engine: &mut dyn CaptureEngine) -> CoreResult<()> {
        for _ in self.primed..self.buffer_count {
            let buffer = engine.allocate_buffer(self.buffer_byte_size)?;
            engine.submit_buffer(buffer)?;
            self.primed += 1;
        }

        info!(primed = self.primed, "Buffer pool primed");

        Ok(())
    }

    /// Buffers handed to the engine so far.
    pub fn primed(&self) -> usize {
        self.primed
    }

    /// Buffers in a fully primed pool.
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Capacity of each buffer.
    pub fn buffer_byte_size(&self) -> usize {
        self.buffer_byte_size
    }
}
