//! Composed asynchronous I/O: the byte-stream abstraction, read and
//! write operations that drive a message coder to a logical completion,
//! and body-stream adapters.
//!
//! Every operation here suspends only at the underlying stream's
//! `read_some`/`write_some`. None of them issue overlapping I/O on the
//! same stream, and cancellation is polled cooperatively between coder
//! steps.

mod body;
mod read;
mod stream;
mod write;

pub use body::{BodyReadStream, BodyWriteStream};
pub use read::{read, read_header, read_some};
pub use stream::{ByteStream, CancelToken, ServerStream};
pub use write::{write, write_some};

use crate::error::Error;

/// Classify a transport error the way the session loop wants to see it:
/// resets fold into [`Error::Reset`], a truncated TLS shutdown counts as
/// end-of-stream, everything else stays an I/O error.
pub(crate) fn map_io(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => Error::Reset,
        std::io::ErrorKind::UnexpectedEof => Error::TlsTruncated,
        _ => Error::Io(e),
    }
}
