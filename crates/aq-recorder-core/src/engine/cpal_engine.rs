use crate::{
    BufferQueue, CaptureBackend, CaptureBuffer, CaptureCallback, CaptureEngine, CodecId,
    CoreResult, RecorderError, StreamFormat,
};

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, SyncSender},
    },
    thread::{self, JoinHandle},
};

use cpal::{
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use tracing::{debug, error, info, instrument, warn};

/// Bits per channel of the PCM this backend produces.
const PCM_BITS_PER_CHANNEL: u32 = 16;

const PCM_BYTES_PER_SAMPLE: usize = 2;

/// Upper bound on output channels; keeps the per-frame scratch on the stack.
const MAX_OUTPUT_CHANNELS: usize = 8;

/// Capture backend for the system's default input device.
///
/// Produces interleaved little-endian 16-bit linear PCM at the device's
/// nominal sample rate. Compressed codecs are rejected during format
/// completion because no encoder is linked.
pub struct CpalBackend {
    device: Device,
    config: SupportedStreamConfig,
}

impl CpalBackend {
    /// Opens the default input device of the default host.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if there is no input device or its
    /// default configuration cannot be read.
    #[track_caller]
    #[instrument]
    pub fn default_input() -> CoreResult<Self> {
        let host = cpal::default_host();

        let device = host.default_input_device().ok_or_else(|| {
            RecorderError::configuration("default_input_device", "no input device found")
        })?;

        let config = device.default_input_config().map_err(|e| {
            RecorderError::configuration("default_input_config", format!("{}", e))
        })?;

        info!(
            device_id = ?device.id(),
            sample_rate = config.sample_rate(),
            channels = config.channels(),
            sample_format = ?config.sample_format(),
            "Input device selected"
        );

        Ok(Self { device, config })
    }
}

impl CaptureBackend for CpalBackend {
    fn default_input_sample_rate(&self) -> CoreResult<f64> {
        Ok(f64::from(self.config.sample_rate()))
    }

    #[track_caller]
    fn complete_format(&self, partial: StreamFormat) -> CoreResult<StreamFormat> {
        if !partial.has_valid_rate_and_channels() {
            return Err(RecorderError::configuration(
                "complete_format",
                format!(
                    "sample rate {} and channel count {} must both be positive",
                    partial.sample_rate, partial.channels_per_frame
                ),
            ));
        }
        if partial.channels_per_frame as usize > MAX_OUTPUT_CHANNELS {
            return Err(RecorderError::configuration(
                "complete_format",
                format!(
                    "{} channels requested, at most {} supported",
                    partial.channels_per_frame, MAX_OUTPUT_CHANNELS
                ),
            ));
        }

        match partial.codec {
            CodecId::LinearPcm => Ok(StreamFormat::linear_pcm(
                partial.sample_rate,
                partial.channels_per_frame,
                PCM_BITS_PER_CHANNEL,
            )),
            CodecId::Aac => Err(RecorderError::configuration(
                "complete_format",
                "the cpal backend records linear PCM only; no AAC encoder is available",
            )),
        }
    }

    fn create_input_engine(
        &self,
        format: &StreamFormat,
        callback: CaptureCallback,
    ) -> CoreResult<Box<dyn CaptureEngine>> {
        let engine = CpalEngine::new(self.device.clone(), &self.config, *format, callback)?;
        Ok(Box::new(engine))
    }
}

/// How device frames map onto output frames.
///
/// Output channel `c` takes device channel `min(c, device_channels - 1)`:
/// a mono device is duplicated across every output channel and surplus
/// device channels are dropped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameLayout {
    pub(crate) device_channels: usize,
    pub(crate) output_channels: usize,
}

impl FrameLayout {
    fn bytes_per_frame(&self) -> usize {
        self.output_channels * PCM_BYTES_PER_SAMPLE
    }
}

pub(crate) enum Delivery {
    Filled(CaptureBuffer),
    Shutdown,
}

/// State shared by the engine, the real-time stream callback and the
/// delivery thread.
pub(crate) struct EngineShared {
    /// Buffers waiting to be filled; the front one is filling.
    pub(crate) submitted: Mutex<VecDeque<CaptureBuffer>>,
    pub(crate) capturing: AtomicBool,
    pub(crate) overrun_frames: AtomicU64,
    pub(crate) layout: FrameLayout,
}

impl EngineShared {
    pub(crate) fn lock_submitted(&self) -> MutexGuard<'_, VecDeque<CaptureBuffer>> {
        self.submitted.lock().unwrap_or_else(|e| {
            error!("Submitted buffer lock poisoned, recovering: {}", e);
            e.into_inner()
        })
    }

    pub(crate) fn enqueue(&self, mut buffer: CaptureBuffer) {
        buffer.reset();
        self.lock_submitted().push_back(buffer);
    }

    /// Copies device frames into the head buffer, sending each buffer on as
    /// soon as another frame no longer fits.
    pub(crate) fn capture<T>(&self, data: &[T], tx: &SyncSender<Delivery>)
    where
        T: SizedSample,
        i16: FromSample<T>,
    {
        if !self.capturing.load(Ordering::Acquire) {
            return;
        }

        let layout = self.layout;
        let frame_bytes = layout.bytes_per_frame();
        let mut frame = [0u8; MAX_OUTPUT_CHANNELS * PCM_BYTES_PER_SAMPLE];

        let mut queue = self.lock_submitted();
        let mut frames = data.chunks_exact(layout.device_channels);

        while let Some(samples) = frames.next() {
            let Some(buffer) = queue.front_mut() else {
                let dropped = 1 + frames.len() as u64;
                self.overrun_frames.fetch_add(dropped, Ordering::Relaxed);
                return;
            };

            for channel in 0..layout.output_channels {
                let source = channel.min(layout.device_channels - 1);
                let sample = samples[source].to_sample::<i16>();
                let at = channel * PCM_BYTES_PER_SAMPLE;
                frame[at..at + PCM_BYTES_PER_SAMPLE].copy_from_slice(&sample.to_le_bytes());
            }
            buffer.fill(&frame[..frame_bytes]);

            if buffer.remaining() < frame_bytes {
                if let Some(full) = queue.pop_front() {
                    if tx.try_send(Delivery::Filled(full)).is_err() {
                        error!("Delivery channel unavailable, filled buffer dropped");
                    }
                }
            }
        }
    }
}

/// Resubmission handle passed to the capture callback.
pub(crate) struct CpalQueue {
    pub(crate) shared: Arc<EngineShared>,
}

impl BufferQueue for CpalQueue {
    fn submit(&self, buffer: CaptureBuffer) -> CoreResult<()> {
        self.shared.enqueue(buffer);
        Ok(())
    }
}

struct DeliveryThread {
    tx: SyncSender<Delivery>,
    handle: JoinHandle<()>,
}

/// Input engine on top of a cpal stream.
///
/// The stream callback runs on the audio thread and only copies samples
/// into the head submitted buffer. Full buffers cross a bounded channel to
/// a dedicated delivery thread, which runs the [`CaptureCallback`] serially
/// in capture order.
pub struct CpalEngine {
    device: Device,
    device_config: StreamConfig,
    sample_format: SampleFormat,
    format: StreamFormat,
    shared: Arc<EngineShared>,
    callback: Option<CaptureCallback>,
    stream: Option<Stream>,
    delivery: Option<DeliveryThread>,
    next_buffer_id: usize,
}

impl CpalEngine {
    #[track_caller]
    fn new(
        device: Device,
        supported: &SupportedStreamConfig,
        format: StreamFormat,
        callback: CaptureCallback,
    ) -> CoreResult<Self> {
        let expected = StreamFormat::linear_pcm(
            format.sample_rate,
            format.channels_per_frame,
            PCM_BITS_PER_CHANNEL,
        );
        if format != expected {
            return Err(RecorderError::configuration(
                "create_input_engine",
                format!("format {:?} is not 16-bit linear PCM", format),
            ));
        }

        let device_channels = usize::from(supported.channels());
        if device_channels == 0 {
            return Err(RecorderError::configuration(
                "create_input_engine",
                "input device reports zero channels",
            ));
        }

        let layout = FrameLayout {
            device_channels,
            output_channels: format.channels_per_frame as usize,
        };
        if layout.device_channels != layout.output_channels {
            info!(
                device_channels = layout.device_channels,
                output_channels = layout.output_channels,
                "Remapping device channels"
            );
        }

        Ok(Self {
            device,
            device_config: supported.config(),
            sample_format: supported.sample_format(),
            format,
            shared: Arc::new(EngineShared {
                submitted: Mutex::new(VecDeque::new()),
                capturing: AtomicBool::new(false),
                overrun_frames: AtomicU64::new(0),
                layout,
            }),
            callback: Some(callback),
            stream: None,
            delivery: None,
            next_buffer_id: 0,
        })
    }

    fn spawn_delivery(&self, callback: CaptureCallback) -> CoreResult<DeliveryThread> {
        // Every allocated buffer plus the shutdown marker fits without blocking.
        let (tx, rx) = mpsc::sync_channel(self.next_buffer_id + 1);
        let queue = CpalQueue {
            shared: Arc::clone(&self.shared),
        };
        let bytes_per_packet = self.format.bytes_per_packet as usize;

        let handle = thread::Builder::new()
            .name("aq-delivery".to_string())
            .spawn(move || deliver(rx, callback, queue, bytes_per_packet))
            .map_err(|e| RecorderError::resource("spawn_delivery_thread", format!("{}", e)))?;

        Ok(DeliveryThread { tx, handle })
    }

    fn build_stream(&self, tx: SyncSender<Delivery>) -> CoreResult<Stream> {
        match self.sample_format {
            SampleFormat::F32 => self.build_typed_stream::<f32>(tx),
            SampleFormat::I16 => self.build_typed_stream::<i16>(tx),
            SampleFormat::I32 => self.build_typed_stream::<i32>(tx),
            SampleFormat::U16 => self.build_typed_stream::<u16>(tx),
            other => Err(RecorderError::configuration(
                "build_input_stream",
                format!("unsupported device sample format {:?}", other),
            )),
        }
    }

    fn build_typed_stream<T>(&self, tx: SyncSender<Delivery>) -> CoreResult<Stream>
    where
        T: SizedSample,
        i16: FromSample<T>,
    {
        let shared = Arc::clone(&self.shared);

        self.device
            .build_input_stream(
                &self.device_config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    shared.capture(data, &tx);
                },
                |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| {
                RecorderError::engine("build_input_stream", format!("Failed to build stream: {}", e))
            })
    }
}

pub(crate) fn deliver(
    rx: Receiver<Delivery>,
    callback: CaptureCallback,
    queue: CpalQueue,
    bytes_per_packet: usize,
) {
    while let Ok(event) = rx.recv() {
        match event {
            Delivery::Filled(buffer) => match u32::try_from(buffer.len() / bytes_per_packet) {
                Ok(packets) => callback.on_buffer_filled(&queue, buffer, packets, None),
                Err(_) => callback.state().record_fault(RecorderError::resource(
                    "deliver_buffer",
                    format!(
                        "buffer of {} bytes holds more packets than fit in one write",
                        buffer.len()
                    ),
                )),
            },
            Delivery::Shutdown => break,
        }
    }

    debug!("Delivery thread finished");
}

/// Sends the partly filled head buffer, if it holds at least one frame, then
/// the shutdown marker. Returns `false` if the delivery thread was gone.
pub(crate) fn flush_and_shutdown(shared: &EngineShared, tx: SyncSender<Delivery>) -> bool {
    let frame_bytes = shared.layout.bytes_per_frame();
    let partial = {
        let mut queue = shared.lock_submitted();
        if queue.front().is_some_and(|b| b.len() >= frame_bytes) {
            queue.pop_front()
        } else {
            None
        }
    };

    let mut sent = true;
    if let Some(buffer) = partial {
        sent &= tx.send(Delivery::Filled(buffer)).is_ok();
    }
    sent &= tx.send(Delivery::Shutdown).is_ok();

    sent
}

impl CaptureEngine for CpalEngine {
    fn confirmed_format(&self) -> CoreResult<StreamFormat> {
        Ok(self.format)
    }

    fn max_output_packet_size(&self) -> CoreResult<u32> {
        Ok(self.format.bytes_per_packet)
    }

    fn cookie(&self) -> CoreResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn allocate_buffer(&mut self, byte_size: usize) -> CoreResult<CaptureBuffer> {
        let buffer = CaptureBuffer::allocate(self.next_buffer_id, byte_size)?;
        self.next_buffer_id += 1;
        Ok(buffer)
    }

    fn submit_buffer(&mut self, buffer: CaptureBuffer) -> CoreResult<()> {
        self.shared.enqueue(buffer);
        Ok(())
    }

    #[instrument(skip(self))]
    fn start(&mut self) -> CoreResult<()> {
        let callback = self
            .callback
            .take()
            .ok_or_else(|| RecorderError::engine("start", "engine was already started"))?;

        let delivery = self.spawn_delivery(callback)?;
        self.shared.capturing.store(true, Ordering::Release);

        let stream = self.build_stream(delivery.tx.clone());
        self.delivery = Some(delivery);
        let stream = stream.inspect_err(|_| {
            self.shared.capturing.store(false, Ordering::Release);
        })?;

        stream.play().map_err(|e| {
            self.shared.capturing.store(false, Ordering::Release);
            RecorderError::engine("start", format!("Failed to start stream: {}", e))
        })?;

        self.stream = Some(stream);
        info!(
            sample_rate = self.format.sample_rate,
            channels = self.format.channels_per_frame,
            "Audio capture started"
        );

        Ok(())
    }

    #[instrument(skip(self))]
    fn stop(&mut self) -> CoreResult<()> {
        self.shared.capturing.store(false, Ordering::Release);

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!(error = %e, "Failed to pause stream before dropping it");
            }
            drop(stream);
        }

        let Some(delivery) = self.delivery.take() else {
            return Ok(());
        };

        let send_failed = !flush_and_shutdown(&self.shared, delivery.tx);

        delivery
            .handle
            .join()
            .map_err(|_| RecorderError::engine("stop", "delivery thread panicked"))?;

        if send_failed {
            return Err(RecorderError::engine(
                "stop",
                "delivery thread exited before the final buffer",
            ));
        }

        let overrun = self.shared.overrun_frames.swap(0, Ordering::AcqRel);
        if overrun > 0 {
            warn!(dropped_frames = overrun, "Input overran the buffer pool");
        }

        info!("Audio capture stopped");

        Ok(())
    }

    fn dispose(mut self: Box<Self>) {
        if self.stream.is_some() || self.delivery.is_some() {
            if let Err(e) = self.stop() {
                error!(error = %e, "Failed to stop engine during dispose");
            }
        }

        let released = {
            let mut queue = self.shared.lock_submitted();
            let released = queue.len();
            queue.clear();
            released
        };

        debug!(released, "Capture engine disposed");
    }
}
