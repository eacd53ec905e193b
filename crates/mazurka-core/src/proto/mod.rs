//! Message-coder contracts consumed by the I/O core, and the HTTP/1
//! implementation of them.
//!
//! The composed operations in [`crate::io`] are written against the
//! [`Parser`] and [`Serializer`] traits only. They never look inside a
//! message; framing, limits and header decoding are entirely the coder's
//! business. [`http1`] provides the one concrete coder this crate ships.

pub mod http1;

use crate::error::Error;

/// Incremental message parser, as consumed by the read operations.
///
/// The parser is a state machine: `reset` → `start` → zero or more
/// `prepare`/`commit`/`parse` rounds → complete. Between `start` and
/// completion, `prepare` exposes writable buffer space, `commit` records
/// bytes written into it and `parse` advances the state machine.
/// `parse` returning [`Error::NeedMoreInput`] is a non-fatal underflow.
pub trait Parser {
    /// The decoded header type.
    type Head;

    /// Return the parser to the fresh state, dropping all input.
    fn reset(&mut self);

    /// Begin parsing a new message. Input left over from the previous
    /// message on the same connection is retained.
    fn start(&mut self);

    /// Advance the state machine over committed input.
    fn parse(&mut self) -> Result<(), Error>;

    /// Writable buffer space for the next read.
    fn prepare(&mut self) -> &mut [u8];

    /// Record `n` bytes written into the space returned by `prepare`.
    fn commit(&mut self, n: usize);

    /// Signal end-of-stream. A following `parse` yields either
    /// completion or an error.
    fn commit_eof(&mut self);

    /// True once the header section has been decoded. Remains true
    /// until `reset` or `start`.
    fn got_header(&self) -> bool;

    /// True once the complete message, body included, has been parsed.
    fn is_complete(&self) -> bool;

    /// The decoded header. Valid once `got_header` returns true.
    fn head(&self) -> &Self::Head;

    /// Body bytes decoded and not yet consumed by the caller.
    fn pull_body(&self) -> &[u8];

    /// Mark `n` bytes returned by `pull_body` as consumed.
    fn consume_body(&mut self, n: usize);
}

/// Outbound message serializer, as consumed by the write operations.
pub trait Serializer {
    /// The next span of wire bytes to send. An empty slice means the
    /// serializer has nothing buffered right now (possible only in
    /// stream-body mode before the body is closed).
    fn prepare(&mut self) -> Result<&[u8], Error>;

    /// Record `n` bytes of the prepared span as sent.
    fn consume(&mut self, n: usize);

    /// True once every byte of the message has been produced and
    /// consumed.
    fn is_done(&self) -> bool;

    /// Return the serializer to the fresh state.
    fn reset(&mut self);
}

/// A [`Serializer`] whose body is supplied incrementally through a
/// stream handle: `stream_prepare`/`stream_commit` feed body bytes in,
/// `stream_close` marks end-of-body.
pub trait StreamSerializer: Serializer {
    /// Writable capacity for body input. May be empty when the internal
    /// buffer is full; draining output frees it.
    fn stream_prepare(&mut self) -> &mut [u8];

    /// Record `n` body bytes written into `stream_prepare` space.
    fn stream_commit(&mut self, n: usize);

    /// Remaining body-input capacity in bytes.
    fn stream_capacity(&self) -> usize;

    /// True while the body stream accepts input.
    fn stream_is_open(&self) -> bool;

    /// Signal end-of-body. Remaining buffered input is flushed by
    /// subsequent `prepare`/`consume` rounds.
    fn stream_close(&mut self);
}
