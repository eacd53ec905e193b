use super::stream::{ByteStream, CancelToken};
use crate::error::Error;
use crate::proto::Parser;

/// Read from `stream` into `parser` until the header section has been
/// decoded or a fatal error occurs. Returns the number of bytes
/// committed into the parser by this call.
///
/// The stream must perform no other reads until the returned future
/// completes.
pub async fn read_header<S, P>(
    stream: &mut S,
    parser: &mut P,
    cancel: &CancelToken,
) -> Result<usize, Error>
where
    S: ByteStream,
    P: Parser,
{
    read_until(stream, parser, cancel, |p: &P| p.got_header()).await
}

/// Read from `stream` into `parser` until the header section and the
/// first available body bytes have been decoded.
///
/// The completion predicate is currently the same as
/// [`read_header`]'s; the separate entry point preserves the intended
/// head-plus-first-body-byte progression.
pub async fn read_some<S, P>(
    stream: &mut S,
    parser: &mut P,
    cancel: &CancelToken,
) -> Result<usize, Error>
where
    S: ByteStream,
    P: Parser,
{
    read_until(stream, parser, cancel, |p: &P| p.got_header()).await
}

/// Read from `stream` into `parser` until the message is complete or a
/// fatal error occurs. Returns the number of bytes committed into the
/// parser by this call.
///
/// If the parser already holds a complete message this completes
/// through the scheduler without touching the stream and reports zero
/// bytes.
pub async fn read<S, P>(
    stream: &mut S,
    parser: &mut P,
    cancel: &CancelToken,
) -> Result<usize, Error>
where
    S: ByteStream,
    P: Parser,
{
    read_until(stream, parser, cancel, |p: &P| p.is_complete()).await
}

/// The shared state machine behind the three read operations: parse,
/// check the predicate, read one chunk, repeat.
async fn read_until<S, P>(
    stream: &mut S,
    parser: &mut P,
    cancel: &CancelToken,
    condition: impl Fn(&P) -> bool,
) -> Result<usize, Error>
where
    S: ByteStream,
    P: Parser,
{
    let mut total = 0usize;
    loop {
        match parser.parse() {
            Err(Error::NeedMoreInput) => {
                if cancel.is_cancelled() {
                    if total != 0 {
                        return Ok(total);
                    }
                    return Err(Error::Cancelled);
                }
                if total != 0 && condition(parser) {
                    return Ok(total);
                }
            }
            Err(e) => {
                if total == 0 {
                    // never complete inline
                    tokio::task::yield_now().await;
                }
                return Err(e);
            }
            Ok(()) => {
                debug_assert!(condition(parser));
                if total == 0 {
                    tokio::task::yield_now().await;
                }
                return Ok(total);
            }
        }

        let n = stream
            .read_some(parser.prepare())
            .await
            .map_err(super::map_io)
            .or_else(|e| match e {
                // a truncated TLS shutdown counts as end-of-stream
                Error::TlsTruncated => Ok(0),
                e => Err(e),
            })?;
        if n == 0 {
            parser.commit_eof();
        } else {
            parser.commit(n);
            total += n;
        }
    }
}
