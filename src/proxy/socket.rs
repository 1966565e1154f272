//! Socket tuning helpers shared by the TCP and UDP data planes.

use std::io;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpStream, UdpSocket};
use tracing::trace;

/// Apply the on-connect tuning profile to a TCP stream.
///
/// Nagle is disabled, keep-alive probes start after `keep_alive`, and
/// the kernel send/receive buffers are hinted to `buffer_bytes`. The
/// buffer and keep-alive hints are best-effort; a kernel that rejects
/// them does not fail the connection.
pub(crate) fn tune_tcp(
    stream: TcpStream,
    keep_alive: Duration,
    buffer_bytes: usize,
) -> io::Result<TcpStream> {
    stream.set_nodelay(true)?;

    let stream = stream.into_std()?;
    {
        let sock = SockRef::from(&stream);
        let keepalive = TcpKeepalive::new()
            .with_time(keep_alive)
            .with_interval(keep_alive);
        if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
            trace!(error = %e, "keep-alive tuning rejected");
        }
        if let Err(e) = sock.set_recv_buffer_size(buffer_bytes) {
            trace!(error = %e, "receive buffer hint rejected");
        }
        if let Err(e) = sock.set_send_buffer_size(buffer_bytes) {
            trace!(error = %e, "send buffer hint rejected");
        }
    }
    TcpStream::from_std(stream)
}

/// Bind a UDP socket and hint its kernel buffers, best-effort.
pub(crate) async fn bind_udp(addr: &str, buffer_bytes: usize) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).await?;

    let socket = socket.into_std()?;
    {
        let sock = SockRef::from(&socket);
        if let Err(e) = sock.set_recv_buffer_size(buffer_bytes) {
            trace!(error = %e, "receive buffer hint rejected");
        }
        if let Err(e) = sock.set_send_buffer_size(buffer_bytes) {
            trace!(error = %e, "send buffer hint rejected");
        }
    }
    UdpSocket::from_std(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tune_tcp_preserves_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (_server, _) = listener.accept().await.unwrap();
        let client = connect.await.unwrap();

        let tuned = tune_tcp(client, Duration::from_secs(15), 128 * 1024).unwrap();
        assert!(tuned.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_bind_udp() {
        let socket = bind_udp("127.0.0.1:0", 64 * 1024).await.unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
