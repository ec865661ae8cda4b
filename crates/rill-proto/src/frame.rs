//! Inbound frame structures and write results

use crate::{ProtocolError, RstStreamErrorCode, StreamId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest valid stream end offset (62-bit variable-length integer space)
pub const MAX_STREAM_OFFSET: u64 = (1 << 62) - 1;

/// A range of stream bytes delivered by the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFrame {
    /// Stream identifier
    pub stream_id: StreamId,
    /// Set on the range that carries the final byte of the stream
    pub fin: bool,
    /// Absolute stream offset of the first payload byte
    pub offset: u64,
    /// Frame payload
    pub data: Bytes,
}

impl StreamFrame {
    /// Create a new stream frame
    pub fn new(stream_id: StreamId, fin: bool, offset: u64, data: Bytes) -> Self {
        Self {
            stream_id,
            fin,
            offset,
            data,
        }
    }

    /// Create a data frame without fin
    pub fn data(stream_id: StreamId, offset: u64, data: impl Into<Bytes>) -> Self {
        Self::new(stream_id, false, offset, data.into())
    }

    /// Create a frame carrying the final byte range of the stream
    pub fn fin(stream_id: StreamId, offset: u64, data: impl Into<Bytes>) -> Self {
        Self::new(stream_id, true, offset, data.into())
    }

    /// Get the payload size
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Offset one past the last payload byte
    pub fn end_offset(&self) -> u64 {
        self.offset.saturating_add(self.data.len() as u64)
    }

    /// Check the frame is addressable: not on the connection id and not past
    /// the offset space.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.stream_id.is_connection() {
            return Err(ProtocolError::ConnectionStreamId);
        }
        match self.offset.checked_add(self.data.len() as u64) {
            Some(end) if end <= MAX_STREAM_OFFSET => Ok(()),
            _ => Err(ProtocolError::OffsetOverflow {
                offset: self.offset,
                len: self.data.len(),
                max: MAX_STREAM_OFFSET,
            }),
        }
    }
}

/// Peer-initiated abrupt termination of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RstStreamFrame {
    /// Stream identifier
    pub stream_id: StreamId,
    /// Peer's reason for the reset
    pub error_code: RstStreamErrorCode,
    /// Final number of bytes the peer wrote on the stream
    pub byte_offset: u64,
}

impl RstStreamFrame {
    /// Create a new reset frame
    pub fn new(stream_id: StreamId, error_code: RstStreamErrorCode, byte_offset: u64) -> Self {
        Self {
            stream_id,
            error_code,
            byte_offset,
        }
    }
}

/// Peer raised the send window of a stream (or of the connection when the
/// id is `StreamId::CONNECTION`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUpdateFrame {
    /// Stream identifier
    pub stream_id: StreamId,
    /// New absolute send window offset
    pub byte_offset: u64,
}

impl WindowUpdateFrame {
    /// Create a new window update frame
    pub fn new(stream_id: StreamId, byte_offset: u64) -> Self {
        Self {
            stream_id,
            byte_offset,
        }
    }
}

/// How much of a write the session accepted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumedData {
    /// Payload bytes accepted
    pub bytes_consumed: usize,
    /// Whether the fin marker was accepted
    pub fin_consumed: bool,
}

impl ConsumedData {
    /// Create a new write result
    pub fn new(bytes_consumed: usize, fin_consumed: bool) -> Self {
        Self {
            bytes_consumed,
            fin_consumed,
        }
    }
}

impl fmt::Display for ConsumedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bytes_consumed: {} fin_consumed: {}",
            self.bytes_consumed, self.fin_consumed
        )
    }
}
