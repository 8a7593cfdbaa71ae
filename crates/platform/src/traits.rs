//! Byte-stream provider traits

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::{ConduitError, ConduitResult};

/// A reliable, ordered, bidirectional byte stream.
///
/// Implemented for anything that is `AsyncRead + AsyncWrite`, so TCP sockets,
/// in-memory duplex pipes and TLS wrappers all qualify.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased byte stream
pub type BoxedStream = Box<dyn ByteStream>;

/// Produces the byte stream a session runs over.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Human readable description of the remote endpoint
    fn endpoint(&self) -> String;

    /// Open a new stream to the endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be reached
    async fn connect(&self) -> ConduitResult<BoxedStream>;
}

/// TCP connector with a bounded connect time.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpConnector {
    /// Default connect timeout (10 seconds)
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a connector for `addr`
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Override the connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Target address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    async fn connect(&self) -> ConduitResult<BoxedStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| ConduitError::TimedOut)??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connector_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            buf
        });

        let connector = TcpConnector::new(addr).with_timeout(Duration::from_secs(2));
        assert_eq!(connector.endpoint(), addr.to_string());

        let mut stream = connector.connect().await.unwrap();
        stream.write_all(b"hello").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TcpConnector::new(addr).connect().await;
        assert!(result.is_err());
    }

    #[test]
    fn test_duplex_is_byte_stream() {
        fn assert_stream<T: ByteStream>() {}
        assert_stream::<tokio::io::DuplexStream>();
    }
}
