//! # Rill Protocol
//!
//! Stream identifiers, error codes and frame types shared between the rill
//! stream engine and the session that multiplexes streams onto a transport.

#![warn(missing_docs)]

/// Stream identifiers, endpoint perspective and write priority
pub mod types;

/// Connection and stream error codes
pub mod codes;

/// Inbound frame structures and write results
pub mod frame;

/// Error types for protocol operations
pub mod error;

pub use types::{Perspective, Priority, StreamId};
pub use codes::{QuicErrorCode, RstStreamErrorCode};
pub use frame::{ConsumedData, RstStreamFrame, StreamFrame, WindowUpdateFrame, MAX_STREAM_OFFSET};
pub use error::ProtocolError;
