pub(crate) mod cpal_engine;

pub use cpal_engine::{CpalBackend, CpalEngine};

use crate::{CaptureBuffer, CaptureCallback, CoreResult, StreamFormat};

/// Handle the capture callback uses to give a buffer back to its engine.
pub trait BufferQueue: Send + Sync {
    /// Enqueues `buffer` to be filled again.
    fn submit(&self, buffer: CaptureBuffer) -> CoreResult<()>;
}

/// A live input engine that fills submitted buffers and reports them full.
///
/// Filled buffers are delivered to the [`CaptureCallback`] the engine was
/// created with, one at a time, in capture order.
pub trait CaptureEngine {
    /// The output description the engine actually produces.
    fn confirmed_format(&self) -> CoreResult<StreamFormat>;

    /// Largest packet the encoder can emit, in bytes.
    fn max_output_packet_size(&self) -> CoreResult<u32>;

    /// Encoder side-information for the container. Empty when the codec
    /// has none.
    fn cookie(&self) -> CoreResult<Vec<u8>>;

    /// Creates a buffer of exactly `byte_size` bytes owned by this engine.
    fn allocate_buffer(&mut self, byte_size: usize) -> CoreResult<CaptureBuffer>;

    /// Enqueues a buffer for filling.
    fn submit_buffer(&mut self, buffer: CaptureBuffer) -> CoreResult<()>;

    /// Starts capturing into the submitted buffers.
    fn start(&mut self) -> CoreResult<()>;

    /// Stops capturing. Returns only once every in-flight buffer has been
    /// delivered and no further callback can fire.
    fn stop(&mut self) -> CoreResult<()>;

    /// Releases the engine and every buffer it still holds. Stops first if
    /// the engine is still running.
    fn dispose(self: Box<Self>);
}

/// Device discovery, format completion and engine construction.
pub trait CaptureBackend {
    /// Nominal sample rate of the default input device.
    fn default_input_sample_rate(&self) -> CoreResult<f64>;

    /// Fills in the size fields of a format that carries a codec, a channel
    /// count and a sample rate.
    fn complete_format(&self, partial: StreamFormat) -> CoreResult<StreamFormat>;

    /// Builds an input engine for `format` that reports filled buffers to
    /// `callback`.
    fn create_input_engine(
        &self,
        format: &StreamFormat,
        callback: CaptureCallback,
    ) -> CoreResult<Box<dyn CaptureEngine>>;
}
