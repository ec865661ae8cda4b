//! Connection and stream error codes

use serde::{Deserialize, Serialize};

/// Connection-level error codes.
///
/// Any of these other than `NoError` tears down the whole multiplexed
/// connection, not just one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum QuicErrorCode {
    /// Graceful close
    NoError = 0,
    /// Implementation error
    InternalError = 1,
    /// Peer is going away
    PeerGoingAway = 16,
    /// Frame referenced a stream id that is invalid for its receiver
    InvalidStreamId = 17,
    /// Peer reset the connection without a close frame
    PublicReset = 19,
    /// Idle timeout expired
    ConnectionTimedOut = 25,
    /// Transport write failed
    PacketWriteError = 27,
    /// Stream data is inconsistent with earlier data (final offset changes,
    /// data past the final offset)
    InvalidStreamData = 46,
    /// Stream frame is malformed
    InvalidStreamFrame = 50,
    /// Peer sent more data than the advertised receive window
    FlowControlError = 59,
    /// Local endpoint sent more data than the peer's window allows
    FlowControlSentTooMuchData = 63,
}

impl QuicErrorCode {
    /// Check if this code reports a failure
    pub fn is_error(self) -> bool {
        self != Self::NoError
    }
}

/// Per-stream reset codes carried by `RST_STREAM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RstStreamErrorCode {
    /// Stream completed normally
    NoError = 0,
    /// Application failed to process the stream
    ErrorProcessingStream = 1,
    /// Peer sent two different final offsets
    MultipleTerminationOffsets = 2,
    /// Application payload could not be parsed
    BadApplicationPayload = 3,
    /// Stream closed because the connection closed with an error
    ConnectionError = 4,
    /// Peer is going away
    PeerGoingAway = 5,
    /// Stream was cancelled by the application
    Cancelled = 6,
    /// Sent on teardown so the peer learns the final byte count
    FlowControlAccounting = 7,
    /// Stream was refused before any data was processed
    RefusedStream = 8,
}

impl Default for RstStreamErrorCode {
    fn default() -> Self {
        Self::NoError
    }
}

impl Default for QuicErrorCode {
    fn default() -> Self {
        Self::NoError
    }
}
