use crate::tests::mock::{MockContainerFactory, aac_format, event_log};
use crate::{
    BufferQueue, CaptureBuffer, CaptureCallback, CoreResult, PacketDescription, RecordState,
    RecorderError, SessionPhase, StopReason, StopSignal, StreamFormat,
};

use std::sync::{Arc, Mutex};

/// Queue that keeps resubmitted buffer ids, optionally refusing them.
#[derive(Default)]
struct RecordingQueue {
    submitted: Mutex<Vec<usize>>,
    refuse: bool,
}

impl BufferQueue for RecordingQueue {
    fn submit(&self, buffer: CaptureBuffer) -> CoreResult<()> {
        if self.refuse {
            return Err(RecorderError::engine("submit", "queue closed"));
        }
        assert!(buffer.is_empty(), "buffer resubmitted without reset");
        self.submitted.lock().unwrap().push(buffer.id());
        Ok(())
    }
}

fn pcm() -> StreamFormat {
    StreamFormat::linear_pcm(44_100.0, 2, 16)
}

fn filled(id: usize, bytes: usize) -> CaptureBuffer {
    let mut buffer = CaptureBuffer::allocate(id, 4096).unwrap();
    buffer.fill(&vec![7; bytes]);
    buffer
}

fn running_state(
    factory: &MockContainerFactory,
    format: &StreamFormat,
) -> (Arc<RecordState>, StopSignal) {
    let stop = StopSignal::new();
    let state = Arc::new(RecordState::new(stop.clone()));
    state.install_output(factory.open(format));
    state.begin_running();
    (state, stop)
}

/// WHAT: Running callbacks write at the cursor and resubmit the buffer
/// WHY: Packets must land contiguously and the pool must keep cycling
#[test]
fn given_running_session_when_buffers_fill_then_written_in_order_and_resubmitted() {
    // Given: A running record with an open container
    let factory = MockContainerFactory::new(&event_log());
    let (state, _stop) = running_state(&factory, &pcm());
    let callback = CaptureCallback::new(Arc::clone(&state));
    let queue = RecordingQueue::default();

    // When: Three buffers arrive with 10, 0 and 5 packets
    callback.on_buffer_filled(&queue, filled(0, 40), 10, None);
    callback.on_buffer_filled(&queue, filled(1, 0), 0, None);
    callback.on_buffer_filled(&queue, filled(2, 20), 5, None);

    // Then: Two writes at packets 0 and 10, every buffer resubmitted
    let log = factory.log.lock().unwrap();
    assert_eq!(log.writes, vec![(0, 10, false), (10, 5, false)]);
    assert_eq!(state.write_cursor(), 15);
    assert_eq!(state.callbacks(), 3);
    assert_eq!(*queue.submitted.lock().unwrap(), vec![0, 1, 2]);
}

/// WHAT: Packet descriptions are passed to the container
/// WHY: Variable-size packets cannot be located without them
#[test]
fn given_described_packets_when_buffer_fills_then_descriptions_forwarded() {
    // Given: A running AAC record
    let factory = MockContainerFactory::new(&event_log());
    let (state, _stop) = running_state(&factory, &aac_format(44_100.0));
    let callback = CaptureCallback::new(Arc::clone(&state));
    let queue = RecordingQueue::default();
    let descriptions = [
        PacketDescription {
            start_offset: 0,
            variable_frames: 0,
            data_byte_size: 6,
        },
        PacketDescription {
            start_offset: 6,
            variable_frames: 0,
            data_byte_size: 9,
        },
    ];

    // When: A buffer with two described packets arrives
    callback.on_buffer_filled(&queue, filled(0, 15), 2, Some(&descriptions));

    // Then: The write carried descriptions
    assert_eq!(factory.log.lock().unwrap().writes, vec![(0, 2, true)]);
    assert_eq!(state.write_cursor(), 2);
}

/// WHAT: Buffers delivered while draining are written but not resubmitted
/// WHY: Stopping must let the pool empty out instead of cycling forever
#[test]
fn given_draining_session_when_buffer_fills_then_written_and_not_resubmitted() {
    // Given: A record that has stopped running
    let factory = MockContainerFactory::new(&event_log());
    let (state, _stop) = running_state(&factory, &pcm());
    state.end_running();
    assert_eq!(state.phase(), SessionPhase::Draining);
    let callback = CaptureCallback::new(Arc::clone(&state));
    let queue = RecordingQueue::default();

    // When: A final partial buffer arrives
    callback.on_buffer_filled(&queue, filled(3, 12), 3, None);

    // Then: Its packets are written and the buffer is dropped
    assert_eq!(factory.log.lock().unwrap().writes, vec![(0, 3, false)]);
    assert!(queue.submitted.lock().unwrap().is_empty());
}

/// WHAT: A write failure becomes the session fault and stops the session
/// WHY: The controller must end the recording instead of losing packets silently
#[test]
fn given_write_failure_when_buffer_fills_then_fault_recorded_and_stop_triggered() {
    // Given: A container that fails its first write
    let mut factory = MockContainerFactory::new(&event_log());
    factory.fail_write_at = Some(0);
    let (state, stop) = running_state(&factory, &pcm());
    let callback = CaptureCallback::new(Arc::clone(&state));
    let queue = RecordingQueue::default();

    // When: A buffer arrives, then another
    callback.on_buffer_filled(&queue, filled(0, 8), 2, None);
    callback.on_buffer_filled(&queue, filled(1, 8), 2, None);

    // Then: Fault recorded once, stop fired, nothing advanced or resubmitted
    assert_eq!(state.phase(), SessionPhase::Faulted);
    assert_eq!(stop.reason(), Some(StopReason::Fault));
    assert_eq!(state.write_cursor(), 0);
    assert_eq!(state.callbacks(), 2);
    assert!(queue.submitted.lock().unwrap().is_empty());
    assert!(factory.log.lock().unwrap().writes.is_empty());
    assert!(matches!(state.take_fault(), Some(RecorderError::Io { .. })));
}

/// WHAT: A refused resubmission is recorded as a fault after the write
/// WHY: The packets are already on disk; only the pool is broken
#[test]
fn given_refusing_queue_when_buffer_fills_then_packets_kept_and_fault_recorded() {
    // Given: A queue that refuses every buffer
    let factory = MockContainerFactory::new(&event_log());
    let (state, stop) = running_state(&factory, &pcm());
    let callback = CaptureCallback::new(Arc::clone(&state));
    let queue = RecordingQueue {
        refuse: true,
        ..RecordingQueue::default()
    };

    // When: A buffer arrives
    callback.on_buffer_filled(&queue, filled(0, 16), 4, None);

    // Then: Written, then faulted with the engine error
    assert_eq!(state.write_cursor(), 4);
    assert_eq!(stop.reason(), Some(StopReason::Fault));
    assert!(matches!(state.take_fault(), Some(RecorderError::Engine { .. })));
}

/// WHAT: A callback after the container is gone faults instead of panicking
/// WHY: A late buffer must never write into a closed file
#[test]
fn given_closed_record_when_buffer_fills_then_io_fault() {
    // Given: A record whose container has been taken
    let factory = MockContainerFactory::new(&event_log());
    let (state, _stop) = running_state(&factory, &pcm());
    let _container = state.take_output();
    state.mark_closed();
    let callback = CaptureCallback::new(Arc::clone(&state));

    // When: A late buffer arrives
    callback.on_buffer_filled(&RecordingQueue::default(), filled(0, 4), 1, None);

    // Then: The fault names the missing container
    assert!(matches!(
        state.take_fault(),
        Some(RecorderError::Io {
            operation: "write_packets",
            ..
        })
    ));
}

/// WHAT: Phases follow the controller's transitions
/// WHY: Logging and callbacks read the phase to decide what to do
#[test]
fn given_fresh_record_when_transitioning_then_phases_follow() {
    // Given: A fresh record
    let state = RecordState::new(StopSignal::new());
    assert_eq!(state.phase(), SessionPhase::Priming);

    // When/Then: Start, stop, close
    state.begin_running();
    assert_eq!(state.phase(), SessionPhase::Running);
    state.end_running();
    assert_eq!(state.phase(), SessionPhase::Draining);
    state.mark_closed();
    assert_eq!(state.phase(), SessionPhase::Closed);
    assert!(!state.is_running());
}

/// WHAT: Closing touches only the closed flag
/// WHY: The running flag belongs to the start and stop transitions
#[test]
fn given_running_record_when_marking_closed_then_running_flag_untouched() {
    // Given: A running record
    let state = RecordState::new(StopSignal::new());
    state.begin_running();

    // When: Marking it closed
    state.mark_closed();

    // Then: Closed wins the phase, running is left as the controller set it
    assert_eq!(state.phase(), SessionPhase::Closed);
    assert!(state.is_running());
}
