//! # Rill
//!
//! A reliable, ordered, flow-controlled bytestream engine for one stream of a
//! multiplexed transport connection.
//!
//! A [`ReliableStream`] reassembles incoming byte ranges into an ordered
//! readable stream, buffers outgoing data the session could not accept yet,
//! keeps per-stream and connection-shared flow-control accounting, and runs
//! the half-close state machine. Everything that touches the wire goes
//! through the [`Session`] trait, implemented by the connection that owns the
//! stream.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use rill_proto as proto;

/// Error types for the stream engine
pub mod error;

/// Flow-control and stream configuration
pub mod config;

/// Credit-based flow-control windows
pub mod flow_control;

/// Receive-side reassembly of byte ranges
pub mod sequencer;

/// Aggregation of transport acknowledgements per application write
pub mod ack;

/// Outbound interface to the owning session
pub mod session;

/// The reliable stream state machine
pub mod stream;

/// Recording session for tests
pub mod test_utils;

pub use error::StreamError;
pub use config::{FlowControlConfig, StreamConfig};
pub use flow_control::FlowController;
pub use sequencer::StreamSequencer;
pub use ack::{AckNotification, AckNotifier};
pub use session::Session;
pub use stream::ReliableStream;

/// Result type alias for stream engine operations
pub type Result<T> = std::result::Result<T, StreamError>;
