//! UDP proxy error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur in the UDP forwarder.
#[derive(Debug, Error)]
pub enum UdpProxyError {
    /// Failed to bind the local server socket.
    #[error("failed to bind {address}: {source}")]
    BindError {
        /// The local address that failed to bind.
        address: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to open or connect a per-client upstream socket.
    #[error("failed to open upstream socket for client {client}: {source}")]
    SessionError {
        /// The client the session was for.
        client: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A datagram send failed.
    #[error("failed to send datagram for client {client}: {source}")]
    SendError {
        /// The client whose traffic was being relayed.
        client: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for UDP proxy operations.
pub type UdpProxyResult<T> = Result<T, UdpProxyError>;
