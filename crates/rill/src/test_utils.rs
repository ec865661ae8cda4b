//! Recording session for tests
//!
//! [`MockSession`] implements [`Session`] by recording every call. How much
//! of each write it accepts is scripted through a [`WritePolicy`].

use crate::ack::{AckNotification, AckNotifier};
use crate::config::FlowControlConfig;
use crate::flow_control::FlowController;
use crate::session::Session;
use bytes::{Bytes, BytesMut};
use rill_proto::{ConsumedData, Perspective, Priority, QuicErrorCode, RstStreamErrorCode, StreamId};

/// How much of each `writev_data` call the mock accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Accept every byte and the fin
    #[default]
    AcceptAll,
    /// Accept at most this many bytes per call; the fin only with the last byte
    AcceptUpTo(usize),
    /// Accept nothing, not even a bare fin
    AcceptNothing,
    /// Accept every byte but never the fin
    RefuseFin,
}

/// One accepted session write
#[derive(Debug, Clone)]
pub struct WriteRecord {
    /// Stream written to
    pub stream_id: StreamId,
    /// Stream offset of the first byte
    pub offset: u64,
    /// Accepted bytes
    pub data: Bytes,
    /// Whether the fin was accepted
    pub fin: bool,
    /// Notifier owed one ack for this write; taken when acked
    pub ack_notifier: Option<AckNotifier>,
}

/// Control calls made by a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `send_rst_stream`
    RstStream {
        /// Stream reset
        id: StreamId,
        /// Reset code
        error: RstStreamErrorCode,
        /// Final size reported
        bytes_written: u64,
    },
    /// `send_blocked`
    Blocked(StreamId),
    /// `send_window_update`
    WindowUpdate {
        /// Window owner
        id: StreamId,
        /// New receive window offset
        byte_offset: u64,
    },
    /// `mark_write_blocked`
    WriteBlocked {
        /// Stream to revisit
        id: StreamId,
        /// Its priority
        priority: Priority,
    },
    /// `close_stream`
    CloseStream(StreamId),
    /// `close_connection`
    CloseConnection {
        /// Close code
        error: QuicErrorCode,
        /// Reason text
        details: String,
    },
}

/// In-memory session that records writes and control signals
#[derive(Debug)]
pub struct MockSession {
    connection_flow_controller: FlowController,
    policy: WritePolicy,
    /// Accepted writes, in call order
    pub writes: Vec<WriteRecord>,
    /// Control calls, in call order
    pub events: Vec<SessionEvent>,
}

impl MockSession {
    /// Create a session with default connection windows
    pub fn new(perspective: Perspective) -> Self {
        Self::with_config(perspective, &FlowControlConfig::default())
    }

    /// Create a session with the given connection windows
    pub fn with_config(perspective: Perspective, config: &FlowControlConfig) -> Self {
        Self {
            connection_flow_controller: FlowController::for_connection(perspective, config),
            policy: WritePolicy::default(),
            writes: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Change the acceptance policy for later writes
    pub fn set_policy(&mut self, policy: WritePolicy) {
        self.policy = policy;
    }

    /// All bytes accepted for `id`, concatenated in write order
    pub fn written_data(&self, id: StreamId) -> Bytes {
        let mut out = BytesMut::new();
        for write in self.writes.iter().filter(|w| w.stream_id == id) {
            out.extend_from_slice(&write.data);
        }
        out.freeze()
    }

    /// Number of accepted fins for `id`
    pub fn fin_count(&self, id: StreamId) -> usize {
        self.writes.iter().filter(|w| w.stream_id == id && w.fin).count()
    }

    /// Number of eviction requests for `id`
    pub fn close_stream_count(&self, id: StreamId) -> usize {
        self.events
            .iter()
            .filter(|e| **e == SessionEvent::CloseStream(id))
            .count()
    }

    /// Resets sent for `id`, as `(error, bytes_written)`
    pub fn rst_streams(&self, id: StreamId) -> Vec<(RstStreamErrorCode, u64)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::RstStream {
                    id: rst_id,
                    error,
                    bytes_written,
                } if *rst_id == id => Some((*error, *bytes_written)),
                _ => None,
            })
            .collect()
    }

    /// `BLOCKED` signals sent for `id`
    pub fn blocked_count(&self, id: StreamId) -> usize {
        self.events
            .iter()
            .filter(|e| **e == SessionEvent::Blocked(id))
            .count()
    }

    /// Window update offsets advertised for `id`
    pub fn window_updates(&self, id: StreamId) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::WindowUpdate { id: update_id, byte_offset } if *update_id == id => {
                    Some(*byte_offset)
                }
                _ => None,
            })
            .collect()
    }

    /// Check if `id` registered itself write-blocked
    pub fn is_write_blocked(&self, id: StreamId) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, SessionEvent::WriteBlocked { id: blocked, .. } if *blocked == id))
    }

    /// First connection close requested, if any
    pub fn connection_close(&self) -> Option<(QuicErrorCode, &str)> {
        self.events.iter().find_map(|e| match e {
            SessionEvent::CloseConnection { error, details } => Some((*error, details.as_str())),
            _ => None,
        })
    }

    /// Deliver `ack` once for every write not yet acked
    pub fn ack_all(&mut self, ack: AckNotification) {
        for write in &mut self.writes {
            if let Some(notifier) = write.ack_notifier.take() {
                notifier.on_ack_notification(ack);
            }
        }
    }
}

impl Session for MockSession {
    fn connection_flow_controller(&self) -> &FlowController {
        &self.connection_flow_controller
    }

    fn connection_flow_controller_mut(&mut self) -> &mut FlowController {
        &mut self.connection_flow_controller
    }

    fn writev_data(
        &mut self,
        id: StreamId,
        data: &[Bytes],
        offset: u64,
        fin: bool,
        ack_notifier: Option<&AckNotifier>,
    ) -> ConsumedData {
        let total: usize = data.iter().map(Bytes::len).sum();
        let accepted = match self.policy {
            WritePolicy::AcceptAll | WritePolicy::RefuseFin => total,
            WritePolicy::AcceptUpTo(limit) => total.min(limit),
            WritePolicy::AcceptNothing => 0,
        };
        let fin_consumed = fin
            && accepted == total
            && matches!(self.policy, WritePolicy::AcceptAll | WritePolicy::AcceptUpTo(_));

        if accepted == 0 && !fin_consumed {
            return ConsumedData::default();
        }

        let mut buffer = BytesMut::with_capacity(accepted);
        let mut remaining = accepted;
        for chunk in data {
            let take = chunk.len().min(remaining);
            buffer.extend_from_slice(&chunk[..take]);
            remaining -= take;
        }

        self.writes.push(WriteRecord {
            stream_id: id,
            offset,
            data: buffer.freeze(),
            fin: fin_consumed,
            ack_notifier: ack_notifier.cloned(),
        });
        ConsumedData::new(accepted, fin_consumed)
    }

    fn send_rst_stream(&mut self, id: StreamId, error: RstStreamErrorCode, bytes_written: u64) {
        self.events.push(SessionEvent::RstStream {
            id,
            error,
            bytes_written,
        });
    }

    fn send_blocked(&mut self, id: StreamId) {
        self.events.push(SessionEvent::Blocked(id));
    }

    fn send_window_update(&mut self, id: StreamId, byte_offset: u64) {
        self.events.push(SessionEvent::WindowUpdate { id, byte_offset });
    }

    fn mark_write_blocked(&mut self, id: StreamId, priority: Priority) {
        self.events.push(SessionEvent::WriteBlocked { id, priority });
    }

    fn close_stream(&mut self, id: StreamId) {
        self.events.push(SessionEvent::CloseStream(id));
    }

    fn close_connection(&mut self, error: QuicErrorCode, details: &str) {
        self.events.push(SessionEvent::CloseConnection {
            error,
            details: details.to_string(),
        });
    }
}
