use super::stream::{ByteStream, CancelToken};
use crate::error::Error;
use crate::proto::Serializer;

/// Write one span of serializer output to `stream`.
///
/// Calls `prepare` once, performs at most one underlying write and
/// records the written count with `consume`. A serializer error
/// completes through the scheduler without touching the stream.
pub async fn write_some<S, Sr>(stream: &mut S, serializer: &mut Sr) -> Result<usize, Error>
where
    S: ByteStream,
    Sr: Serializer,
{
    let buf = match serializer.prepare() {
        Ok(buf) => buf,
        Err(e) => {
            tokio::task::yield_now().await;
            return Err(e);
        }
    };
    if buf.is_empty() {
        tokio::task::yield_now().await;
        return Ok(0);
    }
    let n = stream.write_some(buf).await.map_err(super::map_io)?;
    serializer.consume(n);
    Ok(n)
}

/// Write serializer output to `stream` until `is_done` or an error.
/// Returns the total bytes written.
///
/// Cancellation is observed between writes: with no bytes moved it
/// yields [`Error::Cancelled`], afterwards the partial total is
/// returned as success.
pub async fn write<S, Sr>(
    stream: &mut S,
    serializer: &mut Sr,
    cancel: &CancelToken,
) -> Result<usize, Error>
where
    S: ByteStream,
    Sr: Serializer,
{
    let mut total = 0usize;
    while !serializer.is_done() {
        if cancel.is_cancelled() {
            if total != 0 {
                return Ok(total);
            }
            return Err(Error::Cancelled);
        }
        total += write_some(stream, serializer).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::http1::{Body, Http1Serializer, ResponseHead, SerializerConfig};
    use crate::testing::ScriptedStream;

    fn started(body: &str) -> Http1Serializer {
        let mut sr = Http1Serializer::new(SerializerConfig::default());
        sr.start(&ResponseHead::new(200), Body::from(body));
        sr
    }

    #[tokio::test]
    async fn drains_to_done() {
        let mut s = ScriptedStream::empty();
        let mut sr = started("hello");
        let cancel = CancelToken::new();
        let n = write(&mut s, &mut sr, &cancel).await.unwrap();
        assert!(sr.is_done());
        assert_eq!(n, s.written.len());
        let text = String::from_utf8(s.written).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hello"));
    }

    #[tokio::test]
    async fn one_byte_writes_still_drain() {
        let mut s = ScriptedStream::empty().max_write(1);
        let mut sr = started("hello");
        let cancel = CancelToken::new();
        let n = write(&mut s, &mut sr, &cancel).await.unwrap();
        assert!(sr.is_done());
        assert_eq!(n, s.written.len());
    }

    #[tokio::test]
    async fn write_error_carries_no_partial_success() {
        let mut s = ScriptedStream::empty().fail_write_after(10);
        let mut sr = started("hello");
        let cancel = CancelToken::new();
        let err = write(&mut s, &mut sr, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Reset));
        assert!(!sr.is_done());
    }

    #[tokio::test]
    async fn cancel_before_first_write() {
        let mut s = ScriptedStream::empty();
        let mut sr = started("hello");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = write(&mut s, &mut sr, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(s.written.is_empty());
    }

    #[tokio::test]
    async fn write_some_is_single_shot() {
        let mut s = ScriptedStream::empty().max_write(4);
        let mut sr = started("hello");
        let n = write_some(&mut s, &mut sr).await.unwrap();
        assert_eq!(n, 4);
        assert!(!sr.is_done());
    }

    #[tokio::test]
    async fn unstarted_serializer_errors_inline() {
        let mut s = ScriptedStream::empty();
        let mut sr = Http1Serializer::new(SerializerConfig::default());
        assert!(write_some(&mut s, &mut sr).await.is_err());
        assert!(s.written.is_empty());
    }
}
