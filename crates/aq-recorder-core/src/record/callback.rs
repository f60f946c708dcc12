use crate::{BufferQueue, CaptureBuffer, PacketDescription, RecordState};

use std::sync::Arc;

use tracing::{debug, trace};

/// The per-buffer handler the capture engine calls from its delivery context.
///
/// Engines must call [`on_buffer_filled`](Self::on_buffer_filled) serially:
/// the callback is the only writer of the record's cursor and relies on no
/// two invocations overlapping.
#[derive(Clone)]
pub struct CaptureCallback {
    state: Arc<RecordState>,
}

impl CaptureCallback {
    /// Binds a callback to the session record.
    pub fn new(state: Arc<RecordState>) -> Self {
        Self { state }
    }

    /// The session record this callback writes through.
    pub fn state(&self) -> &RecordState {
        &self.state
    }

    /// Writes a filled buffer's packets and recycles the buffer.
    ///
    /// `packet_count` packets are written at the record's cursor, sized by
    /// `descriptions` when given and as contiguous fixed-size packets
    /// otherwise. The buffer goes back to `queue` only while the session is
    /// running; during draining it is dropped. A write or resubmission
    /// failure is recorded as the session fault, after which further
    /// buffers are dropped unwritten.
    pub fn on_buffer_filled(
        &self,
        queue: &dyn BufferQueue,
        mut buffer: CaptureBuffer,
        packet_count: u32,
        descriptions: Option<&[PacketDescription]>,
    ) {
        self.state.count_callback();

        if self.state.has_fault() {
            trace!(buffer_id = buffer.id(), "Dropping buffer after capture fault");
            return;
        }

        if packet_count > 0 {
            let start_packet = self.state.write_cursor();
            let written = self.state.with_output("write_packets", |output| {
                output.write_packets(start_packet, packet_count, descriptions, buffer.data())
            });

            if let Err(e) = written {
                self.state.record_fault(e);
                return;
            }

            self.state.advance_cursor(packet_count);

            trace!(
                buffer_id = buffer.id(),
                start_packet,
                packet_count,
                bytes = buffer.len(),
                "Packets written"
            );
        }

        if self.state.is_running() {
            buffer.reset();
            if let Err(e) = queue.submit(buffer) {
                self.state.record_fault(e);
            }
        } else {
            debug!(buffer_id = buffer.id(), "Buffer lapsed while draining");
        }
    }
}

impl std::fmt::Debug for CaptureCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCallback")
            .field("state", &self.state)
            .finish()
    }
}
