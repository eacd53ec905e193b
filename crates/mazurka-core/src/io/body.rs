use super::stream::{ByteStream, CancelToken};
use super::{write, write_some};
use crate::error::Error;
use crate::proto::{Parser, StreamSerializer};
#[cfg(test)]
use crate::proto::Serializer;

/// A byte-stream view of a message body being parsed.
///
/// Wraps an underlying stream and a parser owned by the caller. Each
/// `read_some` drives underlying reads until body bytes are available,
/// then copies up to the buffer's length out of the parser. A return of
/// zero with a non-empty buffer means the message is complete.
///
/// The underlying stream must not be read by anything else while this
/// adapter is in use. Dropping the adapter leaves the parser untouched.
pub struct BodyReadStream<'a, S, P> {
    stream: &'a mut S,
    parser: &'a mut P,
}

impl<'a, S, P> BodyReadStream<'a, S, P>
where
    S: ByteStream,
    P: Parser,
{
    pub fn new(stream: &'a mut S, parser: &'a mut P) -> Self {
        Self { stream, parser }
    }

    /// Read some decoded body bytes into `buf`.
    ///
    /// An empty `buf` completes immediately with zero bytes and no
    /// error.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            tokio::task::yield_now().await;
            return Ok(0);
        }
        loop {
            match self.parser.parse() {
                Ok(()) | Err(Error::NeedMoreInput) => {}
                Err(e) => return Err(e),
            }

            let avail = self.parser.pull_body();
            if !avail.is_empty() {
                let n = avail.len().min(buf.len());
                buf[..n].copy_from_slice(&avail[..n]);
                self.parser.consume_body(n);
                return Ok(n);
            }
            if self.parser.is_complete() {
                return Ok(0); // end of body
            }

            let n = self
                .stream
                .read_some(self.parser.prepare())
                .await
                .map_err(super::map_io)
                .or_else(|e| match e {
                    Error::TlsTruncated => Ok(0),
                    e => Err(e),
                })?;
            if n == 0 {
                self.parser.commit_eof();
            } else {
                self.parser.commit(n);
            }
        }
    }
}

/// A byte-stream view of a message body being serialized.
///
/// Wraps an underlying stream and a serializer in stream-body mode.
/// `write_some` copies caller bytes into the serializer's body input
/// and performs one underlying write; `close` ends the body and drains
/// everything remaining.
///
/// # Deferred error reporting
///
/// If a transport error occurs after bytes were committed to the
/// serializer, the call completes successfully with the committed
/// count and the error is saved; the next `write_some` or `close`
/// surfaces it. The caller therefore always learns exactly how many
/// bytes the serializer absorbed.
pub struct BodyWriteStream<'a, S, Sr> {
    stream: &'a mut S,
    serializer: &'a mut Sr,
    saved: Option<Error>,
    cancel: CancelToken,
}

impl<'a, S, Sr> BodyWriteStream<'a, S, Sr>
where
    S: ByteStream,
    Sr: StreamSerializer,
{
    /// The serializer must have been started with `start_stream` and
    /// its body stream must still be open.
    pub fn new(stream: &'a mut S, serializer: &'a mut Sr) -> Self {
        debug_assert!(serializer.stream_is_open());
        Self {
            stream,
            serializer,
            saved: None,
            cancel: CancelToken::new(),
        }
    }

    /// Token observed between writes; cancelling it interrupts a
    /// `write_some` that cannot make progress.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Write some body bytes through the serializer.
    ///
    /// Completes once at least one byte of `buf` has been committed and
    /// one underlying write has been performed. An empty `buf`
    /// completes immediately with zero bytes and no error.
    pub async fn write_some(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if let Some(e) = self.saved.take() {
            tokio::task::yield_now().await;
            return Err(e);
        }
        if buf.is_empty() {
            tokio::task::yield_now().await;
            return Ok(0);
        }
        debug_assert!(!self.serializer.is_done());

        // The serializer's input buffer may be full; then the only move
        // is to flush output until space frees up. Space cannot clear
        // until the headers have gone out, so this can take several
        // rounds.
        loop {
            let space = self.serializer.stream_prepare();
            let n = space.len().min(buf.len());
            space[..n].copy_from_slice(&buf[..n]);
            self.serializer.stream_commit(n);

            if let Err(e) = write_some(self.stream, self.serializer).await {
                if n != 0 {
                    self.saved = Some(e);
                    return Ok(n);
                }
                return Err(e);
            }

            if n != 0 {
                return Ok(n);
            }
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }
    }

    /// Close the body stream and drain the serializer to completion.
    /// A saved error from a previous `write_some` preempts the close.
    pub async fn close(&mut self) -> Result<(), Error> {
        if let Some(e) = self.saved.take() {
            tokio::task::yield_now().await;
            return Err(e);
        }
        self.serializer.stream_close();
        write(self.stream, self.serializer, &self.cancel)
            .await
            .map(|_| ())
    }
}
