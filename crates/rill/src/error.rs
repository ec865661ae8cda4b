//! Error types for the stream engine

use rill_proto::{ProtocolError, QuicErrorCode, StreamId};
use thiserror::Error;

/// Errors that end the whole connection.
///
/// Backpressure is never reported here; it shows up as a partial
/// [`ConsumedData`](rill_proto::ConsumedData) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A range for another stream was delivered to this one
    #[error("Stream id mismatch: frame for stream {received} delivered to stream {expected}")]
    StreamIdMismatch {
        /// Id of the receiving stream
        expected: StreamId,
        /// Id carried by the frame
        received: StreamId,
    },

    /// Peer sent more than the advertised receive window
    #[error("Flow control violation on stream {0}")]
    FlowControlViolation(StreamId),

    /// Stream data conflicts with what was already received
    #[error("Invalid stream data: {0}")]
    InvalidStreamData(&'static str),

    /// Stream frame is malformed
    #[error("Invalid stream frame: {0}")]
    InvalidStreamFrame(&'static str),

    /// Frame failed protocol validation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl StreamError {
    /// Connection close code the session must send for this error
    pub fn connection_error(&self) -> QuicErrorCode {
        match self {
            Self::StreamIdMismatch { .. } => QuicErrorCode::InvalidStreamId,
            Self::FlowControlViolation(_) => QuicErrorCode::FlowControlError,
            Self::InvalidStreamData(_) => QuicErrorCode::InvalidStreamData,
            Self::InvalidStreamFrame(_) | Self::Protocol(_) => QuicErrorCode::InvalidStreamFrame,
        }
    }
}
