//! Flow-control and stream configuration

use rill_proto::Priority;
use serde::{Deserialize, Serialize};

/// Default initial send window before the peer advertises one (16 KiB)
pub const DEFAULT_FLOW_CONTROL_SEND_WINDOW: u64 = 16 * 1024;

/// Default receive window advertised to the peer (16 KiB)
pub const DEFAULT_FLOW_CONTROL_RECEIVE_WINDOW: u64 = 16 * 1024;

/// Flow-control window sizes for streams and the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    /// Enforce flow control at all
    pub enabled: bool,
    /// Bytes a new stream may send before the peer's first window update
    pub initial_stream_send_window: u64,
    /// Receive window advertised for each stream
    pub stream_receive_window: u64,
    /// Bytes the whole connection may send before the peer's first update
    pub initial_session_send_window: u64,
    /// Receive window advertised for the whole connection
    pub session_receive_window: u64,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_stream_send_window: DEFAULT_FLOW_CONTROL_SEND_WINDOW,
            stream_receive_window: DEFAULT_FLOW_CONTROL_RECEIVE_WINDOW,
            initial_session_send_window: DEFAULT_FLOW_CONTROL_SEND_WINDOW,
            session_receive_window: DEFAULT_FLOW_CONTROL_RECEIVE_WINDOW,
        }
    }
}

impl FlowControlConfig {
    /// Configuration with flow control switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Per-stream configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Flow-control windows
    pub flow_control: FlowControlConfig,
    /// Priority reported to the session's write-blocked list
    pub priority: Priority,
}

impl StreamConfig {
    /// Create a configuration with default windows and priority
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole flow-control block
    pub fn with_flow_control(mut self, flow_control: FlowControlConfig) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Set the initial stream send window
    pub fn with_stream_send_window(mut self, bytes: u64) -> Self {
        self.flow_control.initial_stream_send_window = bytes;
        self
    }

    /// Set the stream receive window
    pub fn with_stream_receive_window(mut self, bytes: u64) -> Self {
        self.flow_control.stream_receive_window = bytes;
        self
    }

    /// Enable/disable flow control
    pub fn with_flow_control_enabled(mut self, enabled: bool) -> Self {
        self.flow_control.enabled = enabled;
        self
    }

    /// Set the write priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
