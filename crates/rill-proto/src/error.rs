//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame extends past the largest representable stream offset
    #[error("Stream offset overflow: offset {offset} + {len} bytes (max: {max})")]
    OffsetOverflow {
        /// Starting offset of the frame
        offset: u64,
        /// Payload length
        len: usize,
        /// Largest valid end offset
        max: u64,
    },

    /// Frame is addressed to the connection pseudo-stream
    #[error("Stream frame addressed to the connection-level stream id")]
    ConnectionStreamId,
}
