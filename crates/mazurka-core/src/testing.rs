//! Test doubles for exercising the I/O core without sockets.
//!
//! [`ScriptedStream`] is an in-memory [`ByteStream`](crate::io::ByteStream)
//! with a fixed input script, a capture buffer for output, bounded
//! per-call transfer sizes and scheduled fault injection. It drives the
//! byte-interleaving and failure scenarios the composed operations have
//! to survive.

use std::io;

use crate::io::ByteStream;

/// In-memory byte stream with scripted behavior.
pub struct ScriptedStream {
    input: Vec<u8>,
    rpos: usize,
    /// Everything successfully written to the stream.
    pub written: Vec<u8>,
    max_read: usize,
    max_write: usize,
    fail_read_after: Option<usize>,
    fail_write_after: Option<usize>,
}

impl ScriptedStream {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: input.into(),
            rpos: 0,
            written: Vec::new(),
            max_read: usize::MAX,
            max_write: usize::MAX,
            fail_read_after: None,
            fail_write_after: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Cap every `read_some` at `n` bytes.
    pub fn max_read(mut self, n: usize) -> Self {
        self.max_read = n;
        self
    }

    /// Cap every `write_some` at `n` bytes.
    pub fn max_write(mut self, n: usize) -> Self {
        self.max_write = n;
        self
    }

    /// Fail reads with `ConnectionReset` once `n` input bytes have been
    /// delivered.
    pub fn fail_read_after(mut self, n: usize) -> Self {
        self.fail_read_after = Some(n);
        self
    }

    /// Fail writes with `BrokenPipe` once `n` output bytes have been
    /// accepted.
    pub fn fail_write_after(mut self, n: usize) -> Self {
        self.fail_write_after = Some(n);
        self
    }

    /// Bytes of input not yet delivered.
    pub fn unread(&self) -> usize {
        self.input.len() - self.rpos
    }
}

impl ByteStream for ScriptedStream {
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::task::yield_now().await;
        if let Some(budget) = self.fail_read_after {
            if budget == 0 {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
        }
        let remaining = self.input.len() - self.rpos;
        if remaining == 0 {
            return Ok(0); // end of stream
        }
        let mut n = remaining.min(buf.len()).min(self.max_read);
        if let Some(budget) = &mut self.fail_read_after {
            n = n.min(*budget);
            *budget -= n;
        }
        buf[..n].copy_from_slice(&self.input[self.rpos..self.rpos + n]);
        self.rpos += n;
        Ok(n)
    }

    async fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        tokio::task::yield_now().await;
        if let Some(budget) = self.fail_write_after {
            if budget == 0 {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
        }
        let mut n = buf.len().min(self.max_write);
        if let Some(budget) = &mut self.fail_write_after {
            n = n.min(*budget);
            *budget -= n;
        }
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_and_eof() {
        let mut s = ScriptedStream::new(b"abcdef".to_vec()).max_read(2);
        let mut buf = [0u8; 16];
        assert_eq!(s.read_some(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(s.read_some(&mut buf).await.unwrap(), 2);
        assert_eq!(s.read_some(&mut buf).await.unwrap(), 2);
        assert_eq!(s.read_some(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_fault_fires_after_budget() {
        let mut s = ScriptedStream::empty().fail_write_after(3);
        assert_eq!(s.write_some(b"ab").await.unwrap(), 2);
        assert_eq!(s.write_some(b"cd").await.unwrap(), 1);
        assert!(s.write_some(b"e").await.is_err());
        assert_eq!(s.written, b"abc");
    }
}
