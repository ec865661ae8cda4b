//! Unit tests for the reliable stream

use super::*;
use crate::config::FlowControlConfig;
use crate::test_utils::{MockSession, SessionEvent, WritePolicy};
use rill_proto::MAX_STREAM_OFFSET;
use tokio::sync::oneshot::error::TryRecvError;

const ID: StreamId = StreamId(5);

fn setup() -> (ReliableStream, MockSession) {
    setup_with(StreamConfig::default())
}

fn setup_with(config: StreamConfig) -> (ReliableStream, MockSession) {
    let stream = ReliableStream::new(ID, Perspective::Server, &config);
    let session = MockSession::with_config(Perspective::Server, &config.flow_control);
    (stream, session)
}

fn queued(stream: &ReliableStream) -> Vec<Bytes> {
    stream.queued_data().cloned().collect()
}

#[test]
fn test_write_fully_accepted() {
    let (mut stream, mut session) = setup();

    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"hello"), true, None);

    assert_eq!(session.written_data(ID), Bytes::from_static(b"hello"));
    assert_eq!(session.fin_count(ID), 1);
    assert_eq!(stream.stream_bytes_written(), 5);
    assert!(stream.fin_sent());
    assert!(stream.write_side_closed());
    assert!(!stream.read_side_closed());
    assert!(!stream.has_buffered_data());
    assert_eq!(session.close_stream_count(ID), 0);
}

#[test]
fn test_partial_write_buffers_remainder_and_acks_once() {
    let (mut stream, mut session) = setup();
    let (tx, mut rx) = oneshot::channel();

    session.set_policy(WritePolicy::AcceptUpTo(2));
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"hello"), false, Some(tx));

    assert_eq!(queued(&stream), vec![Bytes::from_static(b"llo")]);
    assert_eq!(stream.stream_bytes_written(), 2);
    assert!(session.is_write_blocked(ID));

    session.set_policy(WritePolicy::AcceptAll);
    stream.on_can_write(&mut session);

    assert!(!stream.has_buffered_data());
    assert_eq!(session.written_data(ID), Bytes::from_static(b"hello"));
    assert_eq!(session.writes[1].offset, 2);
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

    session.ack_all(AckNotification::original(1, 5));
    assert_eq!(rx.try_recv().unwrap(), AckNotification::original(2, 10));
}

#[test]
fn test_non_empty_queue_skips_immediate_write() {
    let (mut stream, mut session) = setup();

    session.set_policy(WritePolicy::AcceptNothing);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abc"), false, None);
    session.set_policy(WritePolicy::AcceptAll);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"def"), false, None);

    assert!(session.writes.is_empty());
    assert_eq!(
        queued(&stream),
        vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")]
    );

    stream.on_can_write(&mut session);
    assert_eq!(session.written_data(ID), Bytes::from_static(b"abcdef"));
    assert!(!stream.has_buffered_data());
}

#[test]
fn test_on_can_write_stops_after_partial_write() {
    let (mut stream, mut session) = setup();

    session.set_policy(WritePolicy::AcceptNothing);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abcd"), false, None);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"efgh"), false, None);

    session.set_policy(WritePolicy::AcceptUpTo(3));
    stream.on_can_write(&mut session);

    // The chunk behind a partial write is not attempted in the same pass.
    assert_eq!(session.written_data(ID), Bytes::from_static(b"abc"));
    assert_eq!(
        queued(&stream),
        vec![Bytes::from_static(b"d"), Bytes::from_static(b"efgh")]
    );

    stream.on_can_write(&mut session);
    assert_eq!(session.written_data(ID), Bytes::from_static(b"abcdefg"));
    assert_eq!(queued(&stream), vec![Bytes::from_static(b"h")]);
}

#[test]
fn test_fin_rides_with_last_queued_chunk() {
    let (mut stream, mut session) = setup();

    session.set_policy(WritePolicy::AcceptUpTo(3));
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abcdef"), true, None);
    assert!(stream.fin_buffered());
    assert!(!stream.fin_sent());
    assert_eq!(session.fin_count(ID), 0);

    stream.on_can_write(&mut session);
    assert!(stream.fin_sent());
    assert!(stream.write_side_closed());
    assert_eq!(session.fin_count(ID), 1);
    assert_eq!(session.written_data(ID), Bytes::from_static(b"abcdef"));
}

#[test]
fn test_refused_fin_is_retried_as_bare_fin() {
    let (mut stream, mut session) = setup();
    let (tx, mut rx) = oneshot::channel();

    session.set_policy(WritePolicy::RefuseFin);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"ab"), true, Some(tx));

    assert!(stream.has_buffered_data());
    assert_eq!(stream.queued_bytes(), 0);
    assert!(session.is_write_blocked(ID));

    session.set_policy(WritePolicy::AcceptAll);
    stream.on_can_write(&mut session);

    assert!(stream.fin_sent());
    assert!(!stream.has_buffered_data());
    assert_eq!(session.fin_count(ID), 1);
    assert_eq!(session.written_data(ID), Bytes::from_static(b"ab"));

    session.ack_all(AckNotification::original(1, 2));
    assert_eq!(rx.try_recv().unwrap(), AckNotification::original(2, 4));
}

#[test]
fn test_stream_window_clamps_write_and_drops_fin() {
    let (mut stream, mut session) = setup_with(StreamConfig::new().with_stream_send_window(4));

    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abcdefgh"), true, None);

    assert_eq!(session.written_data(ID), Bytes::from_static(b"abcd"));
    assert_eq!(session.fin_count(ID), 0);
    assert_eq!(session.blocked_count(ID), 1);
    assert_eq!(queued(&stream), vec![Bytes::from_static(b"efgh")]);
    assert!(stream.is_flow_control_blocked(&session));

    // Another attempt while blocked does not signal again.
    stream.on_can_write(&mut session);
    assert_eq!(session.blocked_count(ID), 1);

    stream.on_window_update_frame(&mut session, &WindowUpdateFrame::new(ID, 100));

    assert_eq!(session.written_data(ID), Bytes::from_static(b"abcdefgh"));
    assert!(stream.fin_sent());
    assert!(!stream.is_flow_control_blocked(&session));
}

#[test]
fn test_connection_window_blocks_and_registers_write_blocked() {
    let config = FlowControlConfig {
        initial_session_send_window: 3,
        ..Default::default()
    };
    let (mut stream, mut session) = setup_with(StreamConfig::new().with_flow_control(config));

    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"hello"), false, None);

    assert_eq!(session.written_data(ID), Bytes::from_static(b"hel"));
    assert_eq!(session.blocked_count(StreamId::CONNECTION), 1);
    assert_eq!(session.blocked_count(ID), 0);
    assert!(session.is_write_blocked(ID));
    assert!(stream.is_flow_control_blocked(&session));
    assert_eq!(session.connection_flow_controller().bytes_sent(), 3);

    stream.on_can_write(&mut session);
    assert_eq!(session.blocked_count(StreamId::CONNECTION), 1);
    assert_eq!(session.written_data(ID), Bytes::from_static(b"hel"));

    session.connection_flow_controller_mut().update_send_window_offset(100);
    stream.on_can_write(&mut session);
    assert_eq!(session.written_data(ID), Bytes::from_static(b"hello"));
}

#[test]
fn test_window_update_for_unblocked_stream_does_not_write() {
    let (mut stream, mut session) = setup();

    session.set_policy(WritePolicy::AcceptNothing);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abc"), false, None);
    session.set_policy(WritePolicy::AcceptAll);

    stream.on_window_update_frame(&mut session, &WindowUpdateFrame::new(ID, 1 << 20));
    assert!(session.writes.is_empty());
    assert_eq!(stream.flow_controller().send_window_offset(), 1 << 20);
}

#[test]
fn test_bare_fin_bypasses_closed_window() {
    let (mut stream, mut session) = setup_with(StreamConfig::new().with_stream_send_window(0));

    stream.write_or_buffer_data(&mut session, Bytes::new(), true, None);

    assert!(stream.fin_sent());
    assert_eq!(session.fin_count(ID), 1);
    assert_eq!(session.blocked_count(ID), 0);
}

#[test]
fn test_zero_window_signals_blocked() {
    let (mut stream, mut session) = setup_with(StreamConfig::new().with_stream_send_window(0));

    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"x"), false, None);

    assert!(session.writes.is_empty());
    assert_eq!(session.blocked_count(ID), 1);
    assert_eq!(stream.queued_bytes(), 1);
}

#[test]
fn test_short_accept_reports_priority() {
    let (mut stream, mut session) = setup_with(StreamConfig::new().with_priority(Priority(1)));

    session.set_policy(WritePolicy::AcceptNothing);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"x"), false, None);

    assert!(session.events.contains(&SessionEvent::WriteBlocked {
        id: ID,
        priority: Priority(1),
    }));
}

#[test]
fn test_writev_after_write_side_closed_is_ignored() {
    let (mut stream, mut session) = setup();
    stream.close_write_side(&mut session);

    let consumed = stream.writev_data(&mut session, &[Bytes::from_static(b"x")], false, None);

    assert_eq!(consumed, ConsumedData::default());
    assert!(session.writes.is_empty());
    assert_eq!(stream.stream_bytes_written(), 0);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "no data and no fin")]
fn test_empty_write_without_fin_panics_in_debug() {
    let (mut stream, mut session) = setup();
    stream.write_or_buffer_data(&mut session, Bytes::new(), false, None);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "after fin was buffered")]
fn test_write_after_fin_panics_in_debug() {
    let (mut stream, mut session) = setup();
    session.set_policy(WritePolicy::AcceptNothing);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"a"), true, None);
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"b"), false, None);
}

#[test]
fn test_in_order_receive_and_read() {
    let (mut stream, mut session) = setup();

    stream
        .on_stream_frame(&mut session, &StreamFrame::data(ID, 0, "hello"))
        .unwrap();

    assert!(stream.has_bytes_to_read());
    assert_eq!(stream.readable_bytes(), 5);
    assert_eq!(stream.read(&mut session), Some(Bytes::from_static(b"hello")));
    assert_eq!(stream.read(&mut session), None);
    assert_eq!(stream.stream_bytes_read(), 5);
    assert_eq!(stream.flow_controller().bytes_consumed(), 5);
    assert_eq!(session.connection_flow_controller().bytes_consumed(), 5);
}

#[test]
fn test_duplicate_frame_counts_bytes_not_output() {
    let (mut stream, mut session) = setup();
    let frame = StreamFrame::data(ID, 0, "hello");

    stream.on_stream_frame(&mut session, &frame).unwrap();
    stream.on_stream_frame(&mut session, &frame).unwrap();

    assert_eq!(stream.stream_bytes_read(), 10);
    assert_eq!(stream.num_frames_received(), 2);
    assert_eq!(stream.num_duplicate_frames_received(), 1);
    assert_eq!(stream.read(&mut session), Some(Bytes::from_static(b"hello")));
    assert_eq!(stream.read(&mut session), None);
    assert_eq!(session.connection_flow_controller().highest_received_byte_offset(), 5);
}

#[test]
fn test_fin_closes_read_side_once_read() {
    let (mut stream, mut session) = setup();

    stream
        .on_stream_frame(&mut session, &StreamFrame::fin(ID, 0, "bye"))
        .unwrap();
    assert!(stream.is_fin_received());
    assert!(!stream.read_side_closed());

    stream.read(&mut session);
    assert!(stream.read_side_closed());
    assert_eq!(session.close_stream_count(ID), 0);
}

#[test]
fn test_bare_fin_after_reading_closes_read_side() {
    let (mut stream, mut session) = setup();

    stream
        .on_stream_frame(&mut session, &StreamFrame::data(ID, 0, "ab"))
        .unwrap();
    stream.read(&mut session);
    stream
        .on_stream_frame(&mut session, &StreamFrame::fin(ID, 2, Bytes::new()))
        .unwrap();

    assert!(stream.read_side_closed());
}

#[test]
fn test_frames_ignored_after_read_side_closed() {
    let (mut stream, mut session) = setup();
    stream.close_read_side(&mut session);

    stream
        .on_stream_frame(&mut session, &StreamFrame::data(ID, 0, "late"))
        .unwrap();

    assert_eq!(stream.stream_bytes_read(), 0);
    assert!(!stream.has_bytes_to_read());
    assert!(session.connection_close().is_none());
}

#[test]
fn test_frame_for_other_stream_closes_connection() {
    let (mut stream, mut session) = setup();

    let result = stream.on_stream_frame(&mut session, &StreamFrame::data(StreamId(7), 0, "x"));

    assert_eq!(
        result,
        Err(StreamError::StreamIdMismatch {
            expected: ID,
            received: StreamId(7),
        })
    );
    let (error, _) = session.connection_close().unwrap();
    assert_eq!(error, QuicErrorCode::InvalidStreamId);
}

#[test]
fn test_offset_overflow_closes_connection() {
    let (mut stream, mut session) = setup();

    let result = stream.on_stream_frame(&mut session, &StreamFrame::data(ID, MAX_STREAM_OFFSET, "x"));

    assert!(matches!(result, Err(StreamError::Protocol(_))));
    assert_eq!(
        session.connection_close().map(|(error, _)| error),
        Some(QuicErrorCode::InvalidStreamFrame)
    );
}

#[test]
fn test_data_past_fin_closes_connection() {
    let (mut stream, mut session) = setup();

    stream
        .on_stream_frame(&mut session, &StreamFrame::fin(ID, 0, "abc"))
        .unwrap();
    let result = stream.on_stream_frame(&mut session, &StreamFrame::data(ID, 2, "cd"));

    assert!(matches!(result, Err(StreamError::InvalidStreamData(_))));
    assert_eq!(
        session.connection_close().map(|(error, _)| error),
        Some(QuicErrorCode::InvalidStreamData)
    );
}

#[test]
fn test_stream_receive_window_violation() {
    let (mut stream, mut session) = setup_with(StreamConfig::new().with_stream_receive_window(10));

    let result = stream.on_stream_frame(&mut session, &StreamFrame::data(ID, 0, vec![0u8; 11]));

    assert_eq!(result, Err(StreamError::FlowControlViolation(ID)));
    assert_eq!(
        session.connection_close().map(|(error, _)| error),
        Some(QuicErrorCode::FlowControlError)
    );
}

#[test]
fn test_connection_receive_window_shared_across_streams() {
    let config = StreamConfig::new().with_flow_control(FlowControlConfig {
        session_receive_window: 10,
        ..Default::default()
    });
    let mut session = MockSession::with_config(Perspective::Server, &config.flow_control);
    let mut first = ReliableStream::new(StreamId(1), Perspective::Server, &config);
    let mut second = ReliableStream::new(StreamId(3), Perspective::Server, &config);

    let frame = StreamFrame::data(StreamId(1), 0, vec![1u8; 6]);
    first.on_stream_frame(&mut session, &frame).unwrap();
    first.on_stream_frame(&mut session, &frame).unwrap();
    assert_eq!(session.connection_flow_controller().highest_received_byte_offset(), 6);

    let result = second.on_stream_frame(&mut session, &StreamFrame::data(StreamId(3), 0, vec![2u8; 6]));

    assert_eq!(result, Err(StreamError::FlowControlViolation(StreamId(3))));
    assert_eq!(session.connection_flow_controller().highest_received_byte_offset(), 12);
}

#[test]
fn test_window_update_after_half_consumed() {
    let (mut stream, mut session) = setup_with(StreamConfig::new().with_stream_receive_window(100));

    stream
        .on_stream_frame(&mut session, &StreamFrame::data(ID, 0, vec![0u8; 40]))
        .unwrap();
    stream.read(&mut session);
    assert!(session.window_updates(ID).is_empty());

    stream
        .on_stream_frame(&mut session, &StreamFrame::data(ID, 40, vec![0u8; 20]))
        .unwrap();
    stream.read(&mut session);

    assert_eq!(session.window_updates(ID), vec![160]);
    assert!(session.window_updates(StreamId::CONNECTION).is_empty());
}

#[test]
fn test_close_both_sides_evicts_once() {
    let (mut stream, mut session) = setup();

    stream.close_read_side(&mut session);
    stream.close_read_side(&mut session);
    assert_eq!(session.close_stream_count(ID), 0);

    stream.close_write_side(&mut session);
    stream.close_write_side(&mut session);
    stream.close_read_side(&mut session);

    assert!(stream.is_closed());
    assert_eq!(session.close_stream_count(ID), 1);
}

#[test]
fn test_reset_then_close_sends_single_rst() {
    let (mut stream, mut session) = setup();
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abc"), false, None);

    stream.reset(&mut session, RstStreamErrorCode::Cancelled);
    assert!(stream.rst_sent());
    assert_eq!(stream.stream_error(), RstStreamErrorCode::Cancelled);
    assert!(!stream.read_side_closed());
    assert!(!stream.write_side_closed());

    stream.on_close(&mut session);

    assert_eq!(
        session.rst_streams(ID),
        vec![(RstStreamErrorCode::Cancelled, 3)]
    );
    assert_eq!(session.close_stream_count(ID), 1);
}

#[test]
fn test_on_close_without_fin_sends_accounting_rst() {
    let (mut stream, mut session) = setup();
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abc"), false, None);

    stream.on_close(&mut session);

    assert_eq!(
        session.rst_streams(ID),
        vec![(RstStreamErrorCode::FlowControlAccounting, 3)]
    );
    assert!(stream.rst_sent());
    assert!(stream.is_closed());
}

#[test]
fn test_on_close_after_fin_sends_no_rst() {
    let (mut stream, mut session) = setup();
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abc"), true, None);

    stream.on_close(&mut session);

    assert!(session.rst_streams(ID).is_empty());
    assert_eq!(session.close_stream_count(ID), 1);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "reset requires an error code")]
fn test_reset_without_error_panics_in_debug() {
    let (mut stream, mut session) = setup();
    stream.reset(&mut session, RstStreamErrorCode::NoError);
}

#[test]
fn test_peer_reset_closes_both_sides() {
    let (mut stream, mut session) = setup();
    stream
        .on_stream_frame(&mut session, &StreamFrame::data(ID, 0, "abc"))
        .unwrap();

    stream.on_stream_reset(&mut session, &RstStreamFrame::new(ID, RstStreamErrorCode::Cancelled, 10));

    assert_eq!(stream.stream_error(), RstStreamErrorCode::Cancelled);
    assert!(stream.is_closed());
    assert!(!stream.has_bytes_to_read());
    assert_eq!(session.close_stream_count(ID), 1);
    assert_eq!(stream.flow_controller().highest_received_byte_offset(), 10);
    assert_eq!(session.connection_flow_controller().highest_received_byte_offset(), 10);
}

#[test]
fn test_connection_close_records_error() {
    let (mut stream, mut session) = setup();

    stream.on_connection_closed(&mut session, QuicErrorCode::PeerGoingAway, true);

    assert_eq!(stream.stream_error(), RstStreamErrorCode::ConnectionError);
    assert_eq!(stream.connection_error(), QuicErrorCode::PeerGoingAway);
    assert!(stream.is_closed());

    stream.on_connection_closed(&mut session, QuicErrorCode::ConnectionTimedOut, false);
    assert_eq!(stream.connection_error(), QuicErrorCode::PeerGoingAway);
    assert_eq!(session.close_stream_count(ID), 1);
}

#[test]
fn test_clean_connection_close_records_nothing() {
    let (mut stream, mut session) = setup();

    stream.on_connection_closed(&mut session, QuicErrorCode::NoError, false);

    assert_eq!(stream.stream_error(), RstStreamErrorCode::NoError);
    assert_eq!(stream.connection_error(), QuicErrorCode::NoError);
    assert!(stream.is_closed());
}

#[test]
fn test_teardown_after_connection_close_sends_final_size() {
    let (mut stream, mut session) = setup();
    stream.write_or_buffer_data(&mut session, Bytes::from_static(b"abc"), false, None);

    stream.on_connection_closed(&mut session, QuicErrorCode::PeerGoingAway, true);
    assert!(session.rst_streams(ID).is_empty());
    assert_eq!(session.close_stream_count(ID), 1);

    stream.on_close(&mut session);
    assert_eq!(
        session.rst_streams(ID),
        vec![(RstStreamErrorCode::FlowControlAccounting, 3)]
    );
    assert_eq!(session.close_stream_count(ID), 1);
}

#[test]
fn test_stream_and_session_are_send() {
    fn assert_send<T: Send>() {}
    assert_send::<ReliableStream>();
    assert_send::<MockSession>();
    assert_send::<AckNotifier>();
}

#[test]
fn test_flow_control_disabled() {
    let config = StreamConfig::new().with_flow_control(FlowControlConfig::disabled());
    let (mut stream, mut session) = setup_with(config);

    stream.write_or_buffer_data(&mut session, Bytes::from(vec![7u8; 100_000]), false, None);
    assert_eq!(stream.stream_bytes_written(), 100_000);
    assert_eq!(stream.flow_controller().bytes_sent(), 0);

    stream
        .on_stream_frame(&mut session, &StreamFrame::data(ID, 0, vec![0u8; 100_000]))
        .unwrap();
    assert_eq!(stream.readable_bytes(), 100_000);

    stream.on_window_update_frame(&mut session, &WindowUpdateFrame::new(ID, 1));
    assert!(!stream.is_flow_control_blocked(&session));
}

#[test]
fn test_set_priority() {
    let (mut stream, _session) = setup();
    assert_eq!(stream.effective_priority(), Priority::DEFAULT);

    stream.set_priority(Priority::HIGHEST);
    assert_eq!(stream.effective_priority(), Priority::HIGHEST);
}
