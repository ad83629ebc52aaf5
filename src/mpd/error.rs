//! Errors raised by the MPD session layer

use thiserror::Error;

use super::protocol::Ack;

/// Failure talking to the device's MPD server
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The session could not be established (refused, unreachable, timeout, bad greeting)
    #[error("cannot connect to MPD at {addr}: {reason}")]
    ConnectionFailure { addr: String, reason: String },

    /// An established session dropped in the middle of a call
    #[error("connection to MPD lost: {0}")]
    ConnectionLost(String),

    /// The server answered with an ACK line
    #[error("MPD refused `{}` (error {}): {}", .0.command, .0.code, .0.message)]
    Ack(Ack),

    /// The server answered something we cannot interpret
    #[error("unexpected MPD response: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Whether the session dropped mid-call and a reconnect may help
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, RemoteError::ConnectionLost(_))
    }

    /// Whether the remote endpoint is unusable for the rest of the run
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, RemoteError::ConnectionFailure { .. })
    }
}
