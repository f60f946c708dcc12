use crate::tests::mock::{MockBackend, MockContainerFactory, event_log, position};
use crate::{
    CodecId, RecorderError, SessionConfig, SessionController, StopReason, StopSignal,
};

use std::path::PathBuf;

fn config(codec: CodecId) -> SessionConfig {
    SessionConfig {
        codec,
        ..SessionConfig::new("session.caf")
    }
}

/// WHAT: A full PCM session writes every delivered packet contiguously
/// WHY: Core end-to-end path: negotiate, prime, capture, drain, close
#[test]
fn given_pcm_session_when_buffers_delivered_then_all_packets_written_in_order() {
    // Given: A PCM backend delivering three buffers, then stopping
    let stop = StopSignal::new();
    let events = event_log();
    let mut backend = MockBackend::pcm(&stop, &events);
    backend.deliveries = vec![300, 400, 77];
    backend.stop_after_deliveries = true;
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let summary = SessionController::new(&backend, &factory, config(CodecId::LinearPcm))
        .run(&stop)
        .unwrap();

    // Then: 777 packets in order, five 88200-byte buffers, file closed
    let container = factory.log.lock().unwrap();
    assert_eq!(container.assert_contiguous(), 777);
    assert_eq!(summary.packets_written, 777);
    assert_eq!(summary.callbacks, 3);
    assert_eq!(summary.buffer_byte_size, 88_200);
    assert_eq!(summary.buffer_count, 5);
    assert_eq!(summary.stop_reason, StopReason::UserRequest);
    assert_eq!(summary.cookie_writes, 0);
    assert_eq!(summary.path, PathBuf::from("session.caf"));
    assert_eq!(summary.format.sample_rate, 44_100.0);
    assert_eq!(container.truncate, Some(true));
    assert_eq!(container.format, Some(summary.format));
    assert!(container.closed);

    let engine = backend.log.lock().unwrap();
    assert_eq!(engine.primed_submissions, 5);
    assert_eq!(engine.resubmissions, 3);
    assert_eq!(engine.running_at_stop, Some(false));
    assert_eq!(engine.max_packet_size_queries, 0);
    assert!(engine.disposed);
}

/// WHAT: Stopping right after start yields a valid empty file
/// WHY: The cookie and header must be in place even with no audio
#[test]
fn given_aac_session_when_stopped_immediately_then_empty_file_with_cookie() {
    // Given: An AAC backend and a stop that has already fired
    let stop = StopSignal::new();
    stop.trigger(StopReason::UserRequest);
    let events = event_log();
    let backend = MockBackend::aac(&stop, &events);
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let summary = SessionController::new(&backend, &factory, config(CodecId::Aac))
        .run(&stop)
        .unwrap();

    // Then: No packets, one cookie, buffers sized from the max packet size
    let container = factory.log.lock().unwrap();
    assert_eq!(summary.packets_written, 0);
    assert!(container.writes.is_empty());
    assert_eq!(container.cookies, vec![vec![0x12, 0x10]]);
    assert_eq!(summary.cookie_writes, 1);
    assert_eq!(summary.buffer_byte_size, 21 * 1536);
    assert_eq!(backend.log.lock().unwrap().max_packet_size_queries, 1);
    assert!(container.closed);
}

/// WHAT: The cookie is stored before capture and again when it changed
/// WHY: Some encoders only finalize their side-information at stop
#[test]
fn given_cookie_changed_by_stop_when_session_ends_then_cookie_written_twice() {
    // Given: An AAC encoder whose cookie changes once stopped
    let stop = StopSignal::new();
    let events = event_log();
    let mut backend = MockBackend::aac(&stop, &events);
    backend.final_cookie = Some(vec![0x12, 0x10, 0x56, 0xE5]);
    backend.deliveries = vec![4, 4];
    backend.stop_after_deliveries = true;
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let summary = SessionController::new(&backend, &factory, config(CodecId::Aac))
        .run(&stop)
        .unwrap();

    // Then: Both cookies reached the container, the first before any write
    let container = factory.log.lock().unwrap();
    assert_eq!(summary.cookie_writes, 2);
    assert_eq!(
        container.cookies,
        vec![vec![0x12, 0x10], vec![0x12, 0x10, 0x56, 0xE5]]
    );
    assert_eq!(container.writes, vec![(0, 4, true), (4, 4, true)]);
    assert!(position(&events, "set_cookie") < position(&events, "start"));
}

/// WHAT: An unchanged cookie is stored once
/// WHY: Rewriting identical side-information is wasted I/O
#[test]
fn given_unchanged_cookie_when_session_ends_then_cookie_written_once() {
    // Given: An AAC encoder with a stable cookie
    let stop = StopSignal::new();
    stop.trigger(StopReason::Interrupted);
    let events = event_log();
    let backend = MockBackend::aac(&stop, &events);
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let summary = SessionController::new(&backend, &factory, config(CodecId::Aac))
        .run(&stop)
        .unwrap();

    // Then: One cookie write, stop reason preserved
    assert_eq!(summary.cookie_writes, 1);
    assert_eq!(factory.log.lock().unwrap().cookies.len(), 1);
    assert_eq!(summary.stop_reason, StopReason::Interrupted);
}

/// WHAT: Codecs without a cookie never touch the container's cookie
/// WHY: An empty magic cookie chunk is invalid
#[test]
fn given_pcm_without_cookie_when_session_runs_then_no_cookie_written() {
    // Given: A PCM backend with no cookie
    let stop = StopSignal::new();
    stop.trigger(StopReason::UserRequest);
    let events = event_log();
    let backend = MockBackend::pcm(&stop, &events);
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let summary = SessionController::new(&backend, &factory, config(CodecId::LinearPcm))
        .run(&stop)
        .unwrap();

    // Then: No cookie anywhere
    assert_eq!(summary.cookie_writes, 0);
    assert!(factory.log.lock().unwrap().cookies.is_empty());
    assert_eq!(position(&events, "set_cookie"), None);
}

/// WHAT: Buffers in flight at stop are written but not resubmitted
/// WHY: Audio captured before stop must not be lost, and the pool must drain
#[test]
fn given_buffers_in_flight_when_stopping_then_drained_into_file() {
    // Given: Two deliveries while running, then five queued buffers drained
    let stop = StopSignal::new();
    let events = event_log();
    let mut backend = MockBackend::pcm(&stop, &events);
    backend.deliveries = vec![10, 20];
    backend.stop_after_deliveries = true;
    backend.drain_packets = Some(5);
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let summary = SessionController::new(&backend, &factory, config(CodecId::LinearPcm))
        .run(&stop)
        .unwrap();

    // Then: 10 + 20 + 5 * 5 packets, nothing resubmitted after stop
    let engine = backend.log.lock().unwrap();
    assert_eq!(summary.packets_written, 55);
    assert_eq!(factory.log.lock().unwrap().assert_contiguous(), 55);
    assert_eq!(engine.drained_deliveries, 5);
    assert_eq!(engine.resubmissions, 2);
    assert_eq!(engine.resubmissions_after_stop, 0);
    assert_eq!(engine.released_at_dispose, 0);
}

/// WHAT: An allocation failure mid-priming tears everything down
/// WHY: No engine, buffer or open file may outlive a failed session
#[test]
fn given_allocation_failure_when_priming_then_resource_error_and_full_teardown() {
    // Given: An engine that fails the third buffer allocation
    let stop = StopSignal::new();
    let events = event_log();
    let mut backend = MockBackend::pcm(&stop, &events);
    backend.fail_allocation_at = Some(2);
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let err = SessionController::new(&backend, &factory, config(CodecId::LinearPcm))
        .run(&stop)
        .unwrap_err();

    // Then: Resource error, engine never started, buffers released, file closed
    assert!(matches!(err, RecorderError::Resource { .. }));
    let engine = backend.log.lock().unwrap();
    assert_eq!(engine.primed_submissions, 2);
    assert!(!engine.started);
    assert!(engine.disposed);
    assert_eq!(engine.released_at_dispose, 2);
    assert!(factory.log.lock().unwrap().closed);
    assert!(position(&events, "dispose") < position(&events, "close"));
}

/// WHAT: A container write failure ends the session with that error
/// WHY: A recording that silently drops packets is worse than none
#[test]
fn given_write_failure_when_recording_then_session_fails_with_io_error() {
    // Given: A container that fails its second write; no external stop
    let stop = StopSignal::new();
    let events = event_log();
    let mut backend = MockBackend::pcm(&stop, &events);
    backend.deliveries = vec![10, 10, 10];
    let mut factory = MockContainerFactory::new(&events);
    factory.fail_write_at = Some(1);

    // When: Running the session
    let err = SessionController::new(&backend, &factory, config(CodecId::LinearPcm))
        .run(&stop)
        .unwrap_err();

    // Then: The fault stopped the session and was returned
    assert!(matches!(err, RecorderError::Io { .. }));
    assert_eq!(stop.reason(), Some(StopReason::Fault));
    let container = factory.log.lock().unwrap();
    assert_eq!(container.writes, vec![(0, 10, false)]);
    assert!(container.closed);
    assert!(backend.log.lock().unwrap().disposed);
}

/// WHAT: A container that lost packets fails the session at close
/// WHY: The file must hold every packet the callback reported as written
#[test]
fn given_container_missing_packets_when_closing_then_io_error_after_close() {
    // Given: A container that reports two packets fewer than it was given
    let stop = StopSignal::new();
    let events = event_log();
    let mut backend = MockBackend::pcm(&stop, &events);
    backend.deliveries = vec![10, 10];
    backend.stop_after_deliveries = true;
    let mut factory = MockContainerFactory::new(&events);
    factory.lose_packets = 2;

    // When: Running the session
    let err = SessionController::new(&backend, &factory, config(CodecId::LinearPcm))
        .run(&stop)
        .unwrap_err();

    // Then: Io error raised at close, file still closed after both writes
    assert!(matches!(
        err,
        RecorderError::Io {
            operation: "close_container",
            ..
        }
    ));
    let container = factory.log.lock().unwrap();
    assert_eq!(container.assert_contiguous(), 20);
    assert!(container.closed);
}

/// WHAT: Invalid configuration fails before any device is touched
/// WHY: Validation errors must not leave files or engines behind
#[test]
fn given_invalid_config_when_running_then_configuration_error_and_nothing_created() {
    // Given: Too few buffers
    let stop = StopSignal::new();
    let events = event_log();
    let backend = MockBackend::pcm(&stop, &events);
    let factory = MockContainerFactory::new(&events);
    let config = SessionConfig {
        buffer_count: 2,
        ..config(CodecId::LinearPcm)
    };

    // When: Running the session
    let err = SessionController::new(&backend, &factory, config)
        .run(&stop)
        .unwrap_err();

    // Then: Configuration error, no engine or container events
    assert!(matches!(err, RecorderError::Configuration { .. }));
    assert!(events.lock().unwrap().is_empty());
}

/// WHAT: A failed sample rate query aborts before the engine exists
/// WHY: A format without a rate cannot size buffers
#[test]
fn given_sample_rate_query_failure_when_running_then_configuration_error() {
    // Given: A backend that cannot read the device rate
    let stop = StopSignal::new();
    let events = event_log();
    let mut backend = MockBackend::pcm(&stop, &events);
    backend.fail_sample_rate = true;
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let err = SessionController::new(&backend, &factory, config(CodecId::LinearPcm))
        .run(&stop)
        .unwrap_err();

    // Then: Configuration error, nothing created
    assert!(matches!(err, RecorderError::Configuration { .. }));
    assert_eq!(position(&events, "create_engine"), None);
    assert_eq!(position(&events, "create_container"), None);
}

/// WHAT: An engine that refuses to start is disposed and the file closed
/// WHY: Start failures happen after the container exists
#[test]
fn given_start_failure_when_running_then_engine_error_and_teardown() {
    // Given: An engine that fails to start
    let stop = StopSignal::new();
    let events = event_log();
    let mut backend = MockBackend::pcm(&stop, &events);
    backend.fail_start = true;
    let factory = MockContainerFactory::new(&events);

    // When: Running the session
    let err = SessionController::new(&backend, &factory, config(CodecId::LinearPcm))
        .run(&stop)
        .unwrap_err();

    // Then: Engine error, all five buffers released at dispose, file closed
    assert!(matches!(err, RecorderError::Engine { .. }));
    let engine = backend.log.lock().unwrap();
    assert!(engine.disposed);
    assert_eq!(engine.released_at_dispose, 5);
    assert!(factory.log.lock().unwrap().closed);
    assert!(position(&events, "dispose") < position(&events, "close"));
}

/// WHAT: Sessions get distinct identifiers
/// WHY: Log lines from consecutive recordings must be told apart
#[test]
fn given_two_controllers_when_created_then_session_ids_differ() {
    // Given: One backend and factory
    let stop = StopSignal::new();
    let events = event_log();
    let backend = MockBackend::pcm(&stop, &events);
    let factory = MockContainerFactory::new(&events);

    // When: Creating two controllers
    let first = SessionController::new(&backend, &factory, config(CodecId::LinearPcm));
    let second = SessionController::new(&backend, &factory, config(CodecId::LinearPcm));

    // Then: Distinct ids, shared config
    assert_ne!(first.session_id(), second.session_id());
    assert_eq!(first.config(), second.config());
}
