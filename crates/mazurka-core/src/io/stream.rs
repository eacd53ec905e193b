use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// An asynchronous byte stream.
///
/// Implementations provide single-shot partial reads and writes; the
/// composed operations in this module layer completion semantics on
/// top. A read returning `Ok(0)` with a non-empty buffer means the peer
/// closed its sending side.
pub trait ByteStream {
    fn read_some(
        &mut self,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = io::Result<usize>>;

    fn write_some(&mut self, buf: &[u8]) -> impl std::future::Future<Output = io::Result<usize>>;
}

/// The server-side connection stream: a plain TCP socket or a
/// TLS-layered one. Dispatch is a `match`, not a vtable.
pub enum ServerStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl ServerStream {
    /// Shut down the sending side, letting the peer observe a clean
    /// end-of-stream.
    pub async fn shutdown(&mut self) {
        match self {
            ServerStream::Plain(s) => {
                let _ = s.shutdown().await;
            }
            #[cfg(feature = "tls")]
            ServerStream::Tls(s) => {
                let _ = s.shutdown().await;
            }
        }
    }
}

impl ByteStream for ServerStream {
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ServerStream::Plain(s) => s.read(buf).await,
            #[cfg(feature = "tls")]
            ServerStream::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ServerStream::Plain(s) => s.write(buf).await,
            #[cfg(feature = "tls")]
            ServerStream::Tls(s) => s.write(buf).await,
        }
    }
}

impl ByteStream for TcpStream {
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf).await
    }

    async fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf).await
    }
}

#[cfg(feature = "tls")]
impl ByteStream for tokio_rustls::client::TlsStream<TcpStream> {
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf).await
    }

    async fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf).await
    }
}

/// Cooperative cancellation flag shared between an operation and its
/// canceller.
///
/// The composed operations poll the token between coder steps: before
/// any bytes have moved a cancellation surfaces as
/// [`Error::Cancelled`](crate::Error::Cancelled); afterwards the
/// operation completes with the partial count.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
