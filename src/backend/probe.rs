//! Readiness probes against the emulator's REST port.

use crate::constants::PROBE_TIMEOUT;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// True once something accepts connections on `host:port`.
pub async fn probe_tcp(host: &str, port: u16) -> bool {
    matches!(
        timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// True once `host:port` answers an HTTP request with any bytes at all.
///
/// A bare connect is not enough behind docker-proxy, which accepts
/// connections before the container is listening and then closes them.
pub async fn probe_http(host: &str, port: u16) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect((host, port)).await?;
        let request = format!(
            "GET / HTTP/1.1\r\nHost: {}:{}\r\nConnection: close\r\n\r\n",
            host, port
        );
        stream.write_all(request.as_bytes()).await?;

        let mut buffer = [0u8; 64];
        let read = stream.read(&mut buffer).await?;
        Ok::<bool, std::io::Error>(read > 0)
    };

    matches!(timeout(PROBE_TIMEOUT, attempt).await, Ok(Ok(true)))
}
