//! Fault kinds surfaced by the liveness protocol.

use thiserror::Error;

/// Why a read on the connection failed.
///
/// Every variant means the same thing to the session: the peer is presumed
/// unreachable and the session ends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadFault {
    /// No frame arrived before the read deadline.
    #[error("read deadline elapsed")]
    DeadlineElapsed,
    /// The peer sent a close frame or the stream ended.
    #[error("peer closed the connection")]
    PeerClosed,
    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Why a write on the connection failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteFault {
    /// The write (including waiting for the write path) took too long.
    #[error("write timed out")]
    TimedOut,
    /// A text frame carried a payload that is not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidText,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// The WebSocket handshake failed; no session was created.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),
    #[error("read fault: {0}")]
    Read(#[from] ReadFault),
    #[error("write fault: {0}")]
    Write(#[from] WriteFault),
    /// The connection handle has already been released.
    #[error("connection closed")]
    Closed,
}

impl Fault {
    /// True for faults that mean the peer can no longer be reached.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Fault::Read(_))
    }
}
