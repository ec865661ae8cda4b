//! Shared helpers for stream integration tests

#![allow(dead_code)]

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use rill::proto::{Perspective, StreamFrame, StreamId, WindowUpdateFrame};
use rill::test_utils::{MockSession, SessionEvent};
use rill::{ReliableStream, Session, StreamConfig};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One endpoint: a session and a single stream on it
pub struct Endpoint {
    pub session: MockSession,
    pub stream: ReliableStream,
    /// Writes already turned into frames for the peer
    delivered: usize,
}

impl Endpoint {
    pub fn new(id: StreamId, perspective: Perspective, config: &StreamConfig) -> Self {
        Self {
            session: MockSession::with_config(perspective, &config.flow_control),
            stream: ReliableStream::new(id, perspective, config),
            delivered: 0,
        }
    }

    /// Frames for every write accepted since the last call
    pub fn take_frames(&mut self) -> Vec<StreamFrame> {
        let frames = self.session.writes[self.delivered..]
            .iter()
            .map(|w| StreamFrame::new(w.stream_id, w.fin, w.offset, w.data.clone()))
            .collect();
        self.delivered = self.session.writes.len();
        frames
    }

    /// Read everything currently readable
    pub fn read_all(&mut self) -> Bytes {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.stream.read(&mut self.session) {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }

    /// Apply a window update advertised by the peer
    pub fn apply_window_update(&mut self, id: StreamId, byte_offset: u64) {
        if id.is_connection() {
            if self
                .session
                .connection_flow_controller_mut()
                .update_send_window_offset(byte_offset)
            {
                self.stream.on_can_write(&mut self.session);
            }
        } else {
            self.stream
                .on_window_update_frame(&mut self.session, &WindowUpdateFrame::new(id, byte_offset));
        }
    }

    /// Remove and return the window updates this endpoint advertised
    pub fn drain_window_updates(&mut self) -> Vec<(StreamId, u64)> {
        let mut updates = Vec::new();
        self.session.events.retain(|event| match event {
            SessionEvent::WindowUpdate { id, byte_offset } => {
                updates.push((*id, *byte_offset));
                false
            }
            _ => true,
        });
        updates
    }
}

/// Move data from `sender` to `receiver` until the receiver has read the fin
/// or nothing moves any more. Returns the bytes read.
pub fn pump(sender: &mut Endpoint, receiver: &mut Endpoint) -> Result<Bytes> {
    let mut out = BytesMut::new();
    loop {
        let frames = sender.take_frames();
        for frame in &frames {
            receiver.stream.on_stream_frame(&mut receiver.session, frame)?;
        }
        out.extend_from_slice(&receiver.read_all());

        let updates = receiver.drain_window_updates();
        if receiver.stream.read_side_closed() || (frames.is_empty() && updates.is_empty()) {
            break;
        }
        for (id, byte_offset) in updates {
            sender.apply_window_update(id, byte_offset);
        }
    }
    Ok(out.freeze())
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}
