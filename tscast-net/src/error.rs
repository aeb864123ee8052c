//! Network error types.

use std::io;

use thiserror::Error;

/// Errors raised by the wire-side components.
#[derive(Error, Debug)]
pub enum NetError {
    /// The egress socket could not be created. Fatal to the process: the
    /// muxer cannot operate without its socket.
    #[error("Failed to create UDP socket: {0}")]
    SocketInit(io::Error),

    /// A datagram send failed. The datagram is dropped and the stream
    /// continues on schedule.
    #[error("UDP send failed: {0}")]
    SocketSend(io::Error),

    /// A muxer worker thread could not be spawned. Fatal to the process,
    /// like a socket creation failure.
    #[error("Failed to spawn muxer thread: {0}")]
    ThreadSpawn(io::Error),
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetError::SocketSend(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.to_string().starts_with("UDP send failed"));
    }
}
