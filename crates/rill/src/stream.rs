//! The reliable stream state machine

use crate::ack::{AckNotification, AckNotifier};
use crate::config::StreamConfig;
use crate::flow_control::FlowController;
use crate::sequencer::StreamSequencer;
use crate::session::Session;
use crate::{Result, StreamError};
use bytes::{Buf, Bytes};
use rill_proto::{
    ConsumedData, Perspective, Priority, QuicErrorCode, RstStreamErrorCode, RstStreamFrame,
    StreamFrame, StreamId, WindowUpdateFrame,
};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

/// Data the session has not accepted yet
#[derive(Debug)]
struct PendingData {
    /// Unsent suffix of one application write
    data: Bytes,
    /// Notifier of the write this data belongs to
    ack_notifier: Option<AckNotifier>,
}

/// One reliable, ordered, flow-controlled stream.
///
/// Owned by the session; every operation that needs to reach the transport
/// takes the session as an argument. Calls must not overlap, but the stream
/// is `Send` and may move between threads with the task that owns it.
#[derive(Debug)]
pub struct ReliableStream {
    /// Stream ID
    id: StreamId,
    /// Endpoint perspective, for log prefixes
    perspective: Perspective,
    /// Priority reported when write-blocked
    priority: Priority,
    /// Receive reassembly
    sequencer: StreamSequencer,
    /// Writes not yet accepted, oldest first
    queued_data: VecDeque<PendingData>,
    /// Raw received byte count, duplicates included
    stream_bytes_read: u64,
    /// Bytes accepted by the session
    stream_bytes_written: u64,
    /// Reason this stream was reset, locally or by the peer
    stream_error: RstStreamErrorCode,
    /// Error of the connection close that ended this stream
    connection_error: QuicErrorCode,
    read_side_closed: bool,
    write_side_closed: bool,
    /// Fin has been handed to `write_or_buffer_data`
    fin_buffered: bool,
    /// Fin has been accepted by the session
    fin_sent: bool,
    /// A reset has been sent for this stream
    rst_sent: bool,
    /// Per-stream window
    flow_controller: FlowController,
}

impl ReliableStream {
    /// Create a new stream
    pub fn new(id: StreamId, perspective: Perspective, config: &StreamConfig) -> Self {
        Self {
            id,
            perspective,
            priority: config.priority,
            sequencer: StreamSequencer::new(),
            queued_data: VecDeque::new(),
            stream_bytes_read: 0,
            stream_bytes_written: 0,
            stream_error: RstStreamErrorCode::NoError,
            connection_error: QuicErrorCode::NoError,
            read_side_closed: false,
            write_side_closed: false,
            fin_buffered: false,
            fin_sent: false,
            rst_sent: false,
            flow_controller: FlowController::for_stream(id, perspective, &config.flow_control),
        }
    }

    fn endpoint(&self) -> &'static str {
        self.perspective.endpoint_prefix()
    }

    /// Handle a range of incoming stream data.
    ///
    /// Errors are fatal to the connection; the session has already been
    /// asked to close it when one is returned.
    pub fn on_stream_frame<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
        frame: &StreamFrame,
    ) -> Result<()> {
        if self.read_side_closed {
            debug!("{}Ignoring frame {}", self.endpoint(), frame.stream_id);
            // The reader is gone: blackhole the data.
            return Ok(());
        }

        if frame.stream_id != self.id {
            return Err(self.close_connection(
                session,
                StreamError::StreamIdMismatch {
                    expected: self.id,
                    received: frame.stream_id,
                },
            ));
        }
        if let Err(e) = frame.validate() {
            return Err(self.close_connection(session, e.into()));
        }

        // Includes duplicate data.
        self.stream_bytes_read += frame.data_len() as u64;

        self.maybe_increase_highest_received_offset(session, frame.end_offset());

        let accepted = self.sequencer.on_stream_frame(frame);

        if self.flow_controller.flow_control_violation()
            || session.connection_flow_controller().flow_control_violation()
        {
            return Err(self.close_connection(session, StreamError::FlowControlViolation(self.id)));
        }

        if let Err(e) = accepted {
            return Err(self.close_connection(session, e));
        }

        if self.sequencer.is_closed() {
            self.on_fin_read(session);
        }
        Ok(())
    }

    /// Take the next contiguous chunk of received data.
    ///
    /// Credits the consumed bytes back to both windows and closes the read
    /// side once the fin has been read.
    pub fn read<S: Session + ?Sized>(&mut self, session: &mut S) -> Option<Bytes> {
        let data = self.sequencer.read()?;
        self.add_bytes_consumed(session, data.len() as u64);
        if self.sequencer.is_closed() {
            self.on_fin_read(session);
        }
        Some(data)
    }

    fn on_fin_read<S: Session + ?Sized>(&mut self, session: &mut S) {
        debug_assert!(self.sequencer.is_closed());
        self.close_read_side(session);
    }

    /// Handle a reset sent by the peer
    pub fn on_stream_reset<S: Session + ?Sized>(&mut self, session: &mut S, frame: &RstStreamFrame) {
        self.maybe_increase_highest_received_offset(session, frame.byte_offset);

        self.stream_error = frame.error_code;
        self.sequencer.discard();
        self.close_write_side(session);
        self.close_read_side(session);
    }

    /// The connection closed; stop both directions.
    ///
    /// Sends nothing to the peer. Closing both sides asks the session to
    /// evict the stream, and the session follows up with [`Self::on_close`],
    /// which sends the final-size reset if no fin or reset went out.
    pub fn on_connection_closed<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
        error: QuicErrorCode,
        from_peer: bool,
    ) {
        if self.read_side_closed && self.write_side_closed {
            return;
        }
        if error.is_error() {
            debug!(
                "{}Stream {} closed by connection error {:?} (from peer: {})",
                self.endpoint(),
                self.id,
                error,
                from_peer
            );
            self.stream_error = RstStreamErrorCode::ConnectionError;
            self.connection_error = error;
        }

        self.close_write_side(session);
        self.close_read_side(session);
    }

    /// Reset this stream with `error`.
    ///
    /// Sides stay open until the session closes the stream.
    pub fn reset<S: Session + ?Sized>(&mut self, session: &mut S, error: RstStreamErrorCode) {
        debug_assert_ne!(error, RstStreamErrorCode::NoError, "reset requires an error code");
        self.stream_error = error;
        session.send_rst_stream(self.id, error, self.stream_bytes_written);
        self.rst_sent = true;
    }

    /// Session teardown of this stream.
    ///
    /// If the peer never learned the final size through a fin or a reset, a
    /// reset is sent so its connection window stays consistent.
    pub fn on_close<S: Session + ?Sized>(&mut self, session: &mut S) {
        self.close_read_side(session);
        self.close_write_side(session);

        if !self.fin_sent && !self.rst_sent {
            debug!("{}Sending RST in on_close: {}", self.endpoint(), self.id);
            session.send_rst_stream(
                self.id,
                RstStreamErrorCode::FlowControlAccounting,
                self.stream_bytes_written,
            );
            self.rst_sent = true;
        }
    }

    /// Write `data` now, or queue whatever the session does not accept.
    ///
    /// If `ack` is given it receives one [`AckNotification`] aggregating all
    /// session writes of this data, once all of them are acked.
    pub fn write_or_buffer_data<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
        data: Bytes,
        fin: bool,
        ack: Option<oneshot::Sender<AckNotification>>,
    ) {
        if data.is_empty() && !fin {
            error!("{}data.is_empty() && !fin", self.endpoint());
            debug_assert!(false, "write_or_buffer_data called with no data and no fin");
            return;
        }

        if self.fin_buffered {
            error!("{}Fin already buffered", self.endpoint());
            debug_assert!(false, "write_or_buffer_data called after fin was buffered");
            return;
        }

        let ack_notifier = ack.map(AckNotifier::new);
        let mut consumed = ConsumedData::default();
        self.fin_buffered = fin;

        if self.queued_data.is_empty() {
            consumed = self.writev_data(session, std::slice::from_ref(&data), fin, ack_notifier.as_ref());
            debug_assert!(consumed.bytes_consumed <= data.len());
        }

        // Queue the unconsumed data or the unconsumed fin.
        let write_completed = if consumed.bytes_consumed < data.len() || (fin && !consumed.fin_consumed) {
            let remainder = data.slice(consumed.bytes_consumed.min(data.len())..);
            self.queued_data.push_back(PendingData {
                data: remainder,
                ack_notifier: ack_notifier.clone(),
            });
            false
        } else {
            true
        };

        if let Some(notifier) = &ack_notifier {
            if consumed.bytes_consumed > 0 || consumed.fin_consumed {
                notifier.wrote_data(write_completed);
            }
        }
    }

    /// The session has capacity again: flush queued data in order.
    pub fn on_can_write<S: Session + ?Sized>(&mut self, session: &mut S) {
        let mut fin = false;
        while let Some(pending) = self.queued_data.front() {
            let data = pending.data.clone();
            let ack_notifier = pending.ack_notifier.clone();
            if self.queued_data.len() == 1 && self.fin_buffered {
                fin = true;
            }

            let consumed = self.writev_data(session, std::slice::from_ref(&data), fin, ack_notifier.as_ref());

            if consumed.bytes_consumed == data.len() && fin == consumed.fin_consumed {
                self.queued_data.pop_front();
                if let Some(notifier) = ack_notifier {
                    notifier.wrote_data(true);
                }
            } else {
                if consumed.bytes_consumed > 0 {
                    if let Some(front) = self.queued_data.front_mut() {
                        front.data.advance(consumed.bytes_consumed);
                    }
                    if let Some(notifier) = ack_notifier {
                        notifier.wrote_data(false);
                    }
                }
                break;
            }
        }
    }

    /// Flow-controlled write through the session.
    ///
    /// Writes at most the smaller of the stream and connection send windows.
    /// A truncated write never carries the fin. Whatever is not accepted is
    /// left to the caller; the stream registers itself write-blocked so
    /// `on_can_write` runs again later.
    pub fn writev_data<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
        data: &[Bytes],
        mut fin: bool,
        ack_notifier: Option<&AckNotifier>,
    ) -> ConsumedData {
        if self.write_side_closed {
            error!("{}Attempt to write when the write side is closed", self.endpoint());
            return ConsumedData::default();
        }

        let mut write_length: usize = data.iter().map(Bytes::len).sum();

        // A fin with no payload is never flow control blocked.
        let fin_with_zero_data = fin && write_length == 0;

        if self.flow_controller.is_enabled() {
            let mut send_window = self.flow_controller.send_window_size();
            let connection = session.connection_flow_controller();
            if connection.is_enabled() {
                send_window = send_window.min(connection.send_window_size());
            }

            if send_window == 0 && !fin_with_zero_data {
                self.maybe_send_blocked(session);
                return ConsumedData::default();
            }

            if write_length as u64 > send_window {
                // The fin must ride with the real final byte.
                fin = false;
                write_length = send_window as usize;
            }
        }

        let buffers = truncate_buffers(data, write_length);
        let consumed = session.writev_data(self.id, &buffers, self.stream_bytes_written, fin, ack_notifier);
        trace!(
            "{}Stream {} wrote at offset {}: {}",
            self.endpoint(),
            self.id,
            self.stream_bytes_written,
            consumed
        );
        self.stream_bytes_written += consumed.bytes_consumed as u64;
        self.add_bytes_sent(session, consumed.bytes_consumed as u64);

        if consumed.bytes_consumed == write_length {
            if !fin_with_zero_data {
                self.maybe_send_blocked(session);
            }
            if fin && consumed.fin_consumed {
                self.fin_sent = true;
                self.close_write_side(session);
            } else if fin && !consumed.fin_consumed {
                session.mark_write_blocked(self.id, self.effective_priority());
            }
        } else {
            session.mark_write_blocked(self.id, self.effective_priority());
        }
        consumed
    }

    /// Emit `BLOCKED` for each window that just became blocked.
    fn maybe_send_blocked<S: Session + ?Sized>(&mut self, session: &mut S) {
        if self.flow_controller.maybe_send_blocked() {
            session.send_blocked(self.id);
        }
        if session.connection_flow_controller_mut().maybe_send_blocked() {
            session.send_blocked(StreamId::CONNECTION);
        }
        // A connection-level window update revisits write-blocked streams
        // only, so register while the connection alone is blocking us.
        if session.connection_flow_controller().is_blocked() && !self.flow_controller.is_blocked() {
            session.mark_write_blocked(self.id, self.effective_priority());
        }
    }

    /// Close the read side; evicts the stream if the write side is closed.
    pub fn close_read_side<S: Session + ?Sized>(&mut self, session: &mut S) {
        if self.read_side_closed {
            return;
        }
        debug!("{}Done reading from stream {}", self.endpoint(), self.id);

        self.read_side_closed = true;
        if self.write_side_closed {
            debug!("{}Closing stream: {}", self.endpoint(), self.id);
            session.close_stream(self.id);
        }
    }

    /// Close the write side; evicts the stream if the read side is closed.
    pub fn close_write_side<S: Session + ?Sized>(&mut self, session: &mut S) {
        if self.write_side_closed {
            return;
        }
        debug!("{}Done writing to stream {}", self.endpoint(), self.id);

        self.write_side_closed = true;
        if self.read_side_closed {
            debug!("{}Closing stream: {}", self.endpoint(), self.id);
            session.close_stream(self.id);
        }
    }

    /// Handle a peer window update for this stream
    pub fn on_window_update_frame<S: Session + ?Sized>(&mut self, session: &mut S, frame: &WindowUpdateFrame) {
        if !self.flow_controller.is_enabled() {
            error!("{}Flow control not enabled! Ignoring window update for stream {}", self.endpoint(), self.id);
            return;
        }
        if frame.stream_id != self.id {
            error!(
                "{}Window update for stream {} delivered to stream {}",
                self.endpoint(),
                frame.stream_id,
                self.id
            );
            return;
        }

        if self.flow_controller.update_send_window_offset(frame.byte_offset) {
            // Unblocked. Priorities are not respected here: every stream
            // unblocked by this update writes immediately.
            self.on_can_write(session);
        }
    }

    /// Raise the highest received offset of this stream, crediting the
    /// connection window with only the increase.
    pub fn maybe_increase_highest_received_offset<S: Session + ?Sized>(&mut self, session: &mut S, new_offset: u64) {
        if !self.flow_controller.is_enabled() {
            return;
        }
        let increment = new_offset.saturating_sub(self.flow_controller.highest_received_byte_offset());
        if self.flow_controller.update_highest_received_offset(new_offset) {
            let connection = session.connection_flow_controller_mut();
            let connection_offset = connection.highest_received_byte_offset() + increment;
            connection.update_highest_received_offset(connection_offset);
        }
    }

    /// Account bytes accepted by the session against both windows
    pub fn add_bytes_sent<S: Session + ?Sized>(&mut self, session: &mut S, bytes: u64) {
        if self.flow_controller.is_enabled() {
            self.flow_controller.add_bytes_sent(bytes);
            session.connection_flow_controller_mut().add_bytes_sent(bytes);
        }
    }

    /// Account bytes delivered to the reader and advertise larger windows
    /// when due
    pub fn add_bytes_consumed<S: Session + ?Sized>(&mut self, session: &mut S, bytes: u64) {
        if !self.flow_controller.is_enabled() {
            return;
        }
        self.flow_controller.add_bytes_consumed(bytes);
        if let Some(offset) = self.flow_controller.maybe_send_window_update() {
            session.send_window_update(self.id, offset);
        }

        let connection = session.connection_flow_controller_mut();
        connection.add_bytes_consumed(bytes);
        if let Some(offset) = connection.maybe_send_window_update() {
            session.send_window_update(StreamId::CONNECTION, offset);
        }
    }

    /// Check if either window blocks sending
    pub fn is_flow_control_blocked<S: Session + ?Sized>(&self, session: &S) -> bool {
        self.flow_controller.is_blocked() || session.connection_flow_controller().is_blocked()
    }

    fn close_connection<S: Session + ?Sized>(&self, session: &mut S, error: StreamError) -> StreamError {
        error!("{}Closing connection from stream {}: {}", self.endpoint(), self.id, error);
        session.close_connection(error.connection_error(), &error.to_string());
        error
    }

    /// Stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Endpoint perspective
    pub fn perspective(&self) -> Perspective {
        self.perspective
    }

    /// Priority used when registering write-blocked
    pub fn effective_priority(&self) -> Priority {
        self.priority
    }

    /// Change the write priority
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Raw received bytes, duplicates included
    pub fn stream_bytes_read(&self) -> u64 {
        self.stream_bytes_read
    }

    /// Bytes accepted by the session
    pub fn stream_bytes_written(&self) -> u64 {
        self.stream_bytes_written
    }

    /// Recorded reset reason
    pub fn stream_error(&self) -> RstStreamErrorCode {
        self.stream_error
    }

    /// Recorded connection close reason
    pub fn connection_error(&self) -> QuicErrorCode {
        self.connection_error
    }

    /// Check if the read side is closed
    pub fn read_side_closed(&self) -> bool {
        self.read_side_closed
    }

    /// Check if the write side is closed
    pub fn write_side_closed(&self) -> bool {
        self.write_side_closed
    }

    /// Check if both sides are closed
    pub fn is_closed(&self) -> bool {
        self.read_side_closed && self.write_side_closed
    }

    /// Check if the fin has been handed to `write_or_buffer_data`
    pub fn fin_buffered(&self) -> bool {
        self.fin_buffered
    }

    /// Check if the fin was accepted by the session
    pub fn fin_sent(&self) -> bool {
        self.fin_sent
    }

    /// Check if a reset was sent
    pub fn rst_sent(&self) -> bool {
        self.rst_sent
    }

    /// Check if writes are queued
    pub fn has_buffered_data(&self) -> bool {
        !self.queued_data.is_empty()
    }

    /// Queued data, oldest first
    pub fn queued_data(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.queued_data.iter().map(|pending| &pending.data)
    }

    /// Total queued bytes
    pub fn queued_bytes(&self) -> usize {
        self.queued_data.iter().map(|pending| pending.data.len()).sum()
    }

    /// Check if contiguous received data is waiting to be read
    pub fn has_bytes_to_read(&self) -> bool {
        self.sequencer.has_bytes_to_read()
    }

    /// Contiguous received bytes waiting to be read
    pub fn readable_bytes(&self) -> usize {
        self.sequencer.readable_bytes()
    }

    /// Check if the peer's fin has arrived
    pub fn is_fin_received(&self) -> bool {
        self.sequencer.close_offset().is_some()
    }

    /// Frames received
    pub fn num_frames_received(&self) -> u64 {
        self.sequencer.num_frames_received()
    }

    /// Frames that carried no new data
    pub fn num_duplicate_frames_received(&self) -> u64 {
        self.sequencer.num_duplicate_frames_received()
    }

    /// Per-stream window
    pub fn flow_controller(&self) -> &FlowController {
        &self.flow_controller
    }
}

/// First `max` bytes of `data`, sliced without copying
fn truncate_buffers(data: &[Bytes], max: usize) -> Vec<Bytes> {
    let mut remaining = max;
    let mut buffers = Vec::with_capacity(data.len());
    for buffer in data {
        if remaining == 0 {
            break;
        }
        let take = buffer.len().min(remaining);
        buffers.push(buffer.slice(..take));
        remaining -= take;
    }
    buffers
}

#[cfg(test)]
mod tests;
