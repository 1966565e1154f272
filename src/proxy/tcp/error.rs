//! TCP proxy error types.

use thiserror::Error;

/// Errors that can occur in the TCP forwarder and its connection pool.
#[derive(Debug, Error)]
pub enum TcpProxyError {
    /// Failed to bind the local listener.
    #[error("failed to bind {address}: {source}")]
    BindError {
        /// The local address that failed to bind.
        address: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Establishing an upstream connection timed out.
    #[error("connect to {host}:{port} timed out")]
    ConnectTimeout {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },

    /// Establishing an upstream connection failed.
    #[error("failed to connect to {host}:{port}: {source}")]
    DialError {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// No upstream connection could be produced for an acquirer.
    ///
    /// This is the unavailable outcome: the caller must drop its client
    /// connection. The pool itself remains operational.
    #[error("no upstream connection available for {host}:{port}")]
    Unavailable {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },

    /// An acquirer waited out the queue timeout.
    #[error("timed out waiting for an upstream connection to {host}:{port}")]
    AcquireTimeout {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// IO error on an in-flight socket.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for TCP proxy operations.
pub type TcpProxyResult<T> = Result<T, TcpProxyError>;
