use std::io::Write;

use super::message::{Body, HeaderMap, RequestHead, ResponseHead, reason_phrase};
use crate::error::Error;
use crate::proto::{Serializer, StreamSerializer};

#[derive(Debug, Clone)]
pub struct SerializerConfig {
    /// Body-input capacity of the stream handle.
    pub stream_buffer_size: usize,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            stream_buffer_size: 4 * 1024,
        }
    }
}

/// Start-line encoding, implemented by the two head types.
pub trait HeadEncode {
    fn encode_start_line(&self, out: &mut Vec<u8>);
    fn headers(&self) -> &HeaderMap;
    /// True when the message must not carry framing headers.
    fn never_has_body(&self) -> bool;
}

impl HeadEncode for RequestHead {
    fn encode_start_line(&self, out: &mut Vec<u8>) {
        let _ = write!(out, "{} {} {}\r\n", self.method, self.target, self.version.as_str());
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn never_has_body(&self) -> bool {
        false
    }
}

impl HeadEncode for ResponseHead {
    fn encode_start_line(&self, out: &mut Vec<u8>) {
        let _ = write!(
            out,
            "{} {} {}\r\n",
            self.version.as_str(),
            self.status,
            reason_phrase(self.status)
        );
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn never_has_body(&self) -> bool {
        self.status < 200 || self.status == 204 || self.status == 304
    }
}

enum BodyState {
    None,
    Full {
        data: Body,
        pos: usize,
    },
    Stream {
        buf: Box<[u8]>,
        len: usize,
        chunked: bool,
        closed: bool,
        final_emitted: bool,
    },
}

/// HTTP/1 message serializer.
///
/// `start` takes a head and a complete body; `start_stream` opens the
/// body for incremental input through the [`StreamSerializer`] handle
/// methods. Output is drained with `prepare`/`consume`.
pub struct Http1Serializer {
    cfg: SerializerConfig,
    head: Vec<u8>,
    head_pos: usize,
    out: Vec<u8>,
    out_pos: usize,
    body: BodyState,
    started: bool,
}

impl Http1Serializer {
    pub fn new(cfg: SerializerConfig) -> Self {
        Self {
            cfg,
            head: Vec::new(),
            head_pos: 0,
            out: Vec::new(),
            out_pos: 0,
            body: BodyState::None,
            started: false,
        }
    }

    /// Begin serializing a message with a body known up front.
    ///
    /// A `Content-Length` header is added when the head carries neither
    /// a length nor a transfer coding.
    pub fn start<H: HeadEncode>(&mut self, head: &H, body: Body) {
        self.reset();
        head.encode_start_line(&mut self.head);
        for (name, value) in head.headers().iter() {
            let _ = write!(self.head, "{name}: {value}\r\n");
        }
        if !head.never_has_body()
            && !head.headers().contains("Content-Length")
            && !head.headers().contains("Transfer-Encoding")
        {
            let _ = write!(self.head, "Content-Length: {}\r\n", body.len());
        }
        self.head.extend_from_slice(b"\r\n");
        self.body = if body.is_empty() {
            BodyState::None
        } else {
            BodyState::Full { data: body, pos: 0 }
        };
        self.started = true;
    }

    /// Begin serializing a message whose body arrives through the
    /// stream handle. Without a `Content-Length` header the body is
    /// chunked; with one, input passes through unframed.
    pub fn start_stream<H: HeadEncode>(&mut self, head: &H) {
        self.reset();
        head.encode_start_line(&mut self.head);
        for (name, value) in head.headers().iter() {
            let _ = write!(self.head, "{name}: {value}\r\n");
        }
        let chunked = !head.headers().contains("Content-Length");
        if chunked && !head.headers().contains("Transfer-Encoding") {
            self.head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        }
        self.head.extend_from_slice(b"\r\n");
        self.body = BodyState::Stream {
            buf: vec![0; self.cfg.stream_buffer_size].into_boxed_slice(),
            len: 0,
            chunked,
            closed: false,
            final_emitted: false,
        };
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl Serializer for Http1Serializer {
    fn prepare(&mut self) -> Result<&[u8], Error> {
        if !self.started {
            return Err(Error::BadMessage("serializer not started"));
        }
        if self.head_pos < self.head.len() {
            return Ok(&self.head[self.head_pos..]);
        }
        match &mut self.body {
            BodyState::None => Ok(&[]),
            BodyState::Full { data, pos } => Ok(&data.as_bytes()[*pos..]),
            BodyState::Stream {
                buf,
                len,
                chunked,
                closed,
                final_emitted,
            } => {
                if self.out_pos < self.out.len() {
                    return Ok(&self.out[self.out_pos..]);
                }
                self.out.clear();
                self.out_pos = 0;
                if *len > 0 {
                    if *chunked {
                        let _ = write!(self.out, "{:x}\r\n", *len);
                        self.out.extend_from_slice(&buf[..*len]);
                        self.out.extend_from_slice(b"\r\n");
                    } else {
                        self.out.extend_from_slice(&buf[..*len]);
                    }
                    *len = 0;
                    return Ok(&self.out[..]);
                }
                if *closed && !*final_emitted {
                    *final_emitted = true;
                    if *chunked {
                        self.out.extend_from_slice(b"0\r\n\r\n");
                    }
                    return Ok(&self.out[..]);
                }
                Ok(&[])
            }
        }
    }

    fn consume(&mut self, n: usize) {
        if self.head_pos < self.head.len() {
            debug_assert!(self.head_pos + n <= self.head.len());
            self.head_pos += n;
            return;
        }
        match &mut self.body {
            BodyState::None => debug_assert_eq!(n, 0),
            BodyState::Full { data, pos } => {
                debug_assert!(*pos + n <= data.len());
                *pos += n;
            }
            BodyState::Stream { .. } => {
                debug_assert!(self.out_pos + n <= self.out.len());
                self.out_pos += n;
            }
        }
    }

    fn is_done(&self) -> bool {
        if !self.started || self.head_pos < self.head.len() {
            return false;
        }
        match &self.body {
            BodyState::None => true,
            BodyState::Full { data, pos } => *pos == data.len(),
            BodyState::Stream {
                len,
                closed,
                final_emitted,
                ..
            } => *closed && *final_emitted && *len == 0 && self.out_pos == self.out.len(),
        }
    }

    fn reset(&mut self) {
        self.head.clear();
        self.head_pos = 0;
        self.out.clear();
        self.out_pos = 0;
        self.body = BodyState::None;
        self.started = false;
    }
}

impl StreamSerializer for Http1Serializer {
    fn stream_prepare(&mut self) -> &mut [u8] {
        match &mut self.body {
            BodyState::Stream {
                buf, len, closed, ..
            } if !*closed => &mut buf[*len..],
            _ => &mut [],
        }
    }

    fn stream_commit(&mut self, n: usize) {
        if let BodyState::Stream { buf, len, .. } = &mut self.body {
            debug_assert!(*len + n <= buf.len());
            *len += n;
        }
    }

    fn stream_capacity(&self) -> usize {
        match &self.body {
            BodyState::Stream {
                buf, len, closed, ..
            } if !*closed => buf.len() - *len,
            _ => 0,
        }
    }

    fn stream_is_open(&self) -> bool {
        matches!(&self.body, BodyState::Stream { closed: false, .. })
    }

    fn stream_close(&mut self) {
        if let BodyState::Stream { closed, .. } = &mut self.body {
            *closed = true;
        }
    }
}
