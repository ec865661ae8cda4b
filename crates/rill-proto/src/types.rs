//! Stream identifiers, endpoint perspective and write priority

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical stream within a connection.
///
/// Id 0 is reserved for connection-level control signals (`BLOCKED`,
/// `WINDOW_UPDATE`). Client-initiated streams are odd, server-initiated
/// streams are even.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Pseudo stream id used for connection-level flow control signals
    pub const CONNECTION: Self = Self(0);

    /// Check if this is the connection-level pseudo stream
    pub fn is_connection(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Which end of the connection this endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Perspective {
    /// Connection initiator
    Client,
    /// Connection acceptor
    Server,
}

impl Perspective {
    /// Prefix used on log and error messages emitted by this endpoint
    pub fn endpoint_prefix(self) -> &'static str {
        match self {
            Self::Server => "Server: ",
            Self::Client => "Client: ",
        }
    }
}

/// Write priority passed to the session's write-blocked list.
///
/// Lower values are served first. The engine only forwards it; scheduling
/// policy belongs to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    /// Most urgent priority
    pub const HIGHEST: Self = Self(0);
    /// Least urgent priority
    pub const LOWEST: Self = Self(7);
    /// Priority assigned to streams that never set one
    pub const DEFAULT: Self = Self(3);
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}
