//! Outbound interface to the owning session

use crate::ack::AckNotifier;
use crate::flow_control::FlowController;
use bytes::Bytes;
use rill_proto::{ConsumedData, Priority, QuicErrorCode, RstStreamErrorCode, StreamId};

/// The connection that owns a set of streams.
///
/// Every method returns immediately. A stream expresses "wait for capacity"
/// by registering itself write-blocked and relying on the session to call
/// [`ReliableStream::on_can_write`](crate::ReliableStream::on_can_write)
/// later. Implementations must not call back into the stream from inside
/// these methods.
pub trait Session {
    /// Connection-wide flow-control window shared by all streams
    fn connection_flow_controller(&self) -> &FlowController;

    /// Mutable access to the connection-wide window
    fn connection_flow_controller_mut(&mut self) -> &mut FlowController;

    /// Write up to the total length of `data` at stream `offset`.
    ///
    /// Returns how many bytes were accepted and whether the fin was. When a
    /// notifier is passed and anything was accepted, the session must later
    /// call [`AckNotifier::on_ack_notification`] exactly once for this write.
    fn writev_data(
        &mut self,
        id: StreamId,
        data: &[Bytes],
        offset: u64,
        fin: bool,
        ack_notifier: Option<&AckNotifier>,
    ) -> ConsumedData;

    /// Send a reset carrying the final number of bytes written
    fn send_rst_stream(&mut self, id: StreamId, error: RstStreamErrorCode, bytes_written: u64);

    /// Tell the peer `id` is flow-control blocked (`StreamId::CONNECTION` for
    /// the connection window)
    fn send_blocked(&mut self, id: StreamId);

    /// Advertise a new receive window offset for `id`
    fn send_window_update(&mut self, id: StreamId, byte_offset: u64);

    /// Revisit `id` with `on_can_write` once capacity frees up
    fn mark_write_blocked(&mut self, id: StreamId, priority: Priority);

    /// Both sides of `id` are closed; evict it.
    ///
    /// The session must then call
    /// [`ReliableStream::on_close`](crate::ReliableStream::on_close) on the
    /// evicted stream, outside this call. That is the only place a stream
    /// that never sent a fin or a reset tells the peer its final size.
    fn close_stream(&mut self, id: StreamId);

    /// Tear down the whole connection
    fn close_connection(&mut self, error: QuicErrorCode, details: &str);
}
