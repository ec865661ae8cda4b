//! Credit-based flow-control windows
//!
//! One [`FlowController`] tracks a single window: either one stream's or the
//! connection-wide one shared by every stream. Controllers never talk to the
//! session themselves. Methods that may require a control signal return what
//! should be sent and the caller emits it, so a stream can update the
//! connection window it borrows from the session without re-entering it.

use crate::config::FlowControlConfig;
use rill_proto::{Perspective, StreamId};
use tracing::{debug, error};

/// Send and receive accounting for one flow-control window
#[derive(Debug, Clone)]
pub struct FlowController {
    /// Stream this window belongs to (`StreamId::CONNECTION` for the session)
    id: StreamId,
    /// Endpoint perspective, for log prefixes
    perspective: Perspective,
    /// Whether accounting is enforced
    enabled: bool,
    /// Total bytes handed to the session
    bytes_sent: u64,
    /// Absolute offset the peer allows us to send up to
    send_window_offset: u64,
    /// Total bytes delivered to the reader
    bytes_consumed: u64,
    /// Largest end offset seen from the peer
    highest_received_byte_offset: u64,
    /// Absolute offset we allow the peer to send up to
    receive_window_offset: u64,
    /// Size of the receive window re-advertised on each update
    max_receive_window: u64,
    /// Send window offset at which `BLOCKED` was last signalled
    last_blocked_send_window_offset: Option<u64>,
}

impl FlowController {
    /// Create an enabled controller
    pub fn new(
        id: StreamId,
        perspective: Perspective,
        send_window_offset: u64,
        receive_window_offset: u64,
        max_receive_window: u64,
    ) -> Self {
        Self {
            id,
            perspective,
            enabled: true,
            bytes_sent: 0,
            send_window_offset,
            bytes_consumed: 0,
            highest_received_byte_offset: 0,
            receive_window_offset,
            max_receive_window,
            last_blocked_send_window_offset: None,
        }
    }

    /// Create the window of stream `id` from configuration
    pub fn for_stream(id: StreamId, perspective: Perspective, config: &FlowControlConfig) -> Self {
        let mut controller = Self::new(
            id,
            perspective,
            config.initial_stream_send_window,
            config.stream_receive_window,
            config.stream_receive_window,
        );
        controller.enabled = config.enabled;
        controller
    }

    /// Create the connection-wide window from configuration
    pub fn for_connection(perspective: Perspective, config: &FlowControlConfig) -> Self {
        let mut controller = Self::new(
            StreamId::CONNECTION,
            perspective,
            config.initial_session_send_window,
            config.session_receive_window,
            config.session_receive_window,
        );
        controller.enabled = config.enabled;
        controller
    }

    /// Check if accounting is enforced
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Id this window belongs to
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Record bytes delivered to the reader
    pub fn add_bytes_consumed(&mut self, bytes: u64) {
        if !self.enabled {
            return;
        }
        self.bytes_consumed += bytes;
        debug!(
            "{}Stream {} consumed {} bytes, total {}",
            self.perspective.endpoint_prefix(),
            self.id,
            bytes,
            self.bytes_consumed
        );
    }

    /// Raise the highest received offset. Returns true if it increased.
    pub fn update_highest_received_offset(&mut self, new_offset: u64) -> bool {
        if !self.enabled || new_offset <= self.highest_received_byte_offset {
            return false;
        }
        debug!(
            "{}Stream {} highest byte offset increased from {} to {}",
            self.perspective.endpoint_prefix(),
            self.id,
            self.highest_received_byte_offset,
            new_offset
        );
        self.highest_received_byte_offset = new_offset;
        true
    }

    /// Record bytes handed to the session. Sending past the window is clamped
    /// and logged; callers are expected to size writes by `send_window_size`.
    pub fn add_bytes_sent(&mut self, bytes: u64) {
        if !self.enabled {
            return;
        }
        if self.bytes_sent + bytes > self.send_window_offset {
            error!(
                "{}Stream {} trying to send an extra {} bytes, when bytes_sent = {}, and send_window_offset = {}",
                self.perspective.endpoint_prefix(),
                self.id,
                bytes,
                self.bytes_sent,
                self.send_window_offset
            );
            self.bytes_sent = self.send_window_offset;
            return;
        }
        self.bytes_sent += bytes;
    }

    /// Check if the peer sent past the receive window we advertised
    pub fn flow_control_violation(&self) -> bool {
        if self.enabled && self.highest_received_byte_offset > self.receive_window_offset {
            error!(
                "{}Flow control violation on stream {}, receive window offset: {}, highest received byte offset: {}",
                self.perspective.endpoint_prefix(),
                self.id,
                self.receive_window_offset,
                self.highest_received_byte_offset
            );
            return true;
        }
        false
    }

    /// Extend the receive window once less than half of it remains.
    ///
    /// Returns the new receive window offset to advertise, if any.
    pub fn maybe_send_window_update(&mut self) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        let available_window = self.receive_window_offset.saturating_sub(self.bytes_consumed);
        let threshold = self.max_receive_window / 2;
        if available_window >= threshold {
            return None;
        }
        self.receive_window_offset = self.bytes_consumed + self.max_receive_window;
        debug!(
            "{}Sending window update for stream {}, new receive window offset: {}",
            self.perspective.endpoint_prefix(),
            self.id,
            self.receive_window_offset
        );
        Some(self.receive_window_offset)
    }

    /// Decide whether a `BLOCKED` signal is due.
    ///
    /// Returns true at most once per send window offset, so a window that
    /// stays closed is reported once until the peer opens it again.
    pub fn maybe_send_blocked(&mut self) -> bool {
        if !self.is_blocked() || self.last_blocked_send_window_offset == Some(self.send_window_offset) {
            return false;
        }
        debug!(
            "{}Stream {} is flow control blocked, send window offset: {}, bytes sent: {}",
            self.perspective.endpoint_prefix(),
            self.id,
            self.send_window_offset,
            self.bytes_sent
        );
        self.last_blocked_send_window_offset = Some(self.send_window_offset);
        true
    }

    /// Apply a peer window update.
    ///
    /// Returns true if the window was blocked before and is open now.
    pub fn update_send_window_offset(&mut self, new_send_window_offset: u64) -> bool {
        if !self.enabled || new_send_window_offset <= self.send_window_offset {
            return false;
        }
        debug!(
            "{}Stream {} received window update, new send window offset: {}",
            self.perspective.endpoint_prefix(),
            self.id,
            new_send_window_offset
        );
        let was_blocked = self.is_blocked();
        self.send_window_offset = new_send_window_offset;
        was_blocked
    }

    /// Check if sending is blocked by this window
    pub fn is_blocked(&self) -> bool {
        self.enabled && self.send_window_size() == 0
    }

    /// Bytes that may still be sent
    pub fn send_window_size(&self) -> u64 {
        self.send_window_offset.saturating_sub(self.bytes_sent)
    }

    /// Total bytes handed to the session
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes delivered to the reader
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Largest end offset received from the peer
    pub fn highest_received_byte_offset(&self) -> u64 {
        self.highest_received_byte_offset
    }

    /// Absolute offset the peer allows us to send up to
    pub fn send_window_offset(&self) -> u64 {
        self.send_window_offset
    }

    /// Absolute offset we allow the peer to send up to
    pub fn receive_window_offset(&self) -> u64 {
        self.receive_window_offset
    }

    /// Receive window size re-advertised on updates
    pub fn max_receive_window(&self) -> u64 {
        self.max_receive_window
    }
}
