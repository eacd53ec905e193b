use arrayvec::ArrayVec;
use memchr::{memchr, memmem};

use super::message::{HeaderMap, Method, RequestHead, ResponseHead, Version};
use crate::error::Error;
use crate::proto::Parser;

/// Most header fields a message may carry.
pub const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Upper bound on the start line plus header section, in bytes.
    pub max_header_size: usize,
    /// Upper bound on the decoded body, in bytes.
    pub max_body_size: u64,
    /// Read window handed out by `prepare`.
    pub read_buffer_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_header_size: 8 * 1024,
            max_body_size: 1024 * 1024,
            read_buffer_size: 4 * 1024,
        }
    }
}

/// Start-line decoding, implemented by the two head types.
///
/// This is an implementation detail of [`Http1Parser`]; use the
/// [`RequestParser`] and [`ResponseParser`] aliases.
pub trait HeadDecode: Default {
    const IS_RESPONSE: bool;

    fn decode_start_line(line: &str) -> Result<Self, Error>;
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn headers(&self) -> &HeaderMap;
    /// True when the message never carries a body regardless of framing
    /// headers (1xx, 204, 304 responses).
    fn never_has_body(&self) -> bool;
}

impl HeadDecode for RequestHead {
    const IS_RESPONSE: bool = false;

    fn decode_start_line(line: &str) -> Result<Self, Error> {
        let mut parts = line.split(' ');
        let method = parts.next().filter(|s| !s.is_empty());
        let target = parts.next().filter(|s| !s.is_empty());
        let version = parts.next();
        let (Some(method), Some(target), Some(version)) = (method, target, version) else {
            return Err(Error::BadMessage("invalid request line"));
        };
        if parts.next().is_some() {
            return Err(Error::BadMessage("invalid request line"));
        }
        Ok(RequestHead {
            method: Method::from_bytes(method.as_bytes()),
            target: target.to_owned(),
            version: decode_version(version)?,
            headers: HeaderMap::new(),
        })
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn never_has_body(&self) -> bool {
        false
    }
}

impl HeadDecode for ResponseHead {
    const IS_RESPONSE: bool = true;

    fn decode_start_line(line: &str) -> Result<Self, Error> {
        let mut parts = line.splitn(3, ' ');
        let version = parts
            .next()
            .ok_or(Error::BadMessage("invalid status line"))?;
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|s| (100..=999).contains(s))
            .ok_or(Error::BadMessage("invalid status code"))?;
        // the reason phrase is ignored
        Ok(ResponseHead {
            status,
            version: decode_version(version)?,
            headers: HeaderMap::new(),
        })
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn never_has_body(&self) -> bool {
        self.status < 200 || self.status == 204 || self.status == 304
    }
}

fn decode_version(s: &str) -> Result<Version, Error> {
    match s {
        "HTTP/1.1" => Ok(Version::Http11),
        "HTTP/1.0" => Ok(Version::Http10),
        _ => Err(Error::BadMessage("unsupported http version")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Header,
    /// Reading a Content-Length body; `0` is the remaining count.
    Body(u64),
    /// Response body delimited by end-of-stream.
    BodyToEof,
    ChunkSize,
    ChunkData(u64),
    ChunkCrlf,
    Trailer,
    Complete,
}

/// Incremental HTTP/1 message parser.
///
/// Input arrives through `prepare`/`commit`; `parse` advances the state
/// machine and reports [`Error::NeedMoreInput`] on underflow. Decoded
/// body bytes accumulate until the caller drains them with
/// `pull_body`/`consume_body`.
///
/// Use the [`RequestParser`] and [`ResponseParser`] aliases.
pub struct Http1Parser<H: HeadDecode> {
    cfg: ParserConfig,
    state: State,
    buf: Vec<u8>,
    len: usize,
    pos: usize,
    eof: bool,
    got_header: bool,
    head: H,
    body: Vec<u8>,
    body_pos: usize,
    body_received: u64,
}

pub type RequestParser = Http1Parser<RequestHead>;
pub type ResponseParser = Http1Parser<ResponseHead>;

impl<H: HeadDecode> Http1Parser<H> {
    pub fn new(cfg: ParserConfig) -> Self {
        Self {
            cfg,
            state: State::Idle,
            buf: Vec::new(),
            len: 0,
            pos: 0,
            eof: false,
            got_header: false,
            head: H::default(),
            body: Vec::new(),
            body_pos: 0,
            body_received: 0,
        }
    }

    /// Unparsed input currently buffered. Pipelined requests leave their
    /// bytes here for the next `start`.
    pub fn leftover(&self) -> usize {
        self.len - self.pos
    }

    fn start_message(&mut self) {
        self.state = State::Header;
        self.got_header = false;
        self.head = H::default();
        self.body.clear();
        self.body_pos = 0;
        self.body_received = 0;
    }

    fn decode_header(&mut self, header_len: usize) -> Result<(), Error> {
        let section = &self.buf[self.pos..self.pos + header_len];
        let mut lines = ArrayVec::<(usize, usize), { MAX_HEADERS + 1 }>::new();
        let mut at = 0;
        while at < section.len() {
            let eol = memmem::find(&section[at..], b"\r\n")
                .map(|i| at + i)
                .unwrap_or(section.len());
            if lines.try_push((at, eol)).is_err() {
                return Err(Error::HeaderTooLarge);
            }
            at = eol + 2;
        }
        let mut it = lines.iter();
        let (s, e) = *it.next().ok_or(Error::BadMessage("empty header"))?;
        let start_line =
            std::str::from_utf8(&section[s..e]).map_err(|_| Error::BadMessage("bad encoding"))?;
        let mut head = H::decode_start_line(start_line)?;

        for &(s, e) in it {
            let line = &section[s..e];
            if line.first() == Some(&b' ') || line.first() == Some(&b'\t') {
                return Err(Error::BadMessage("folded header line"));
            }
            let colon = memchr(b':', line).ok_or(Error::BadMessage("header missing colon"))?;
            if colon == 0 {
                return Err(Error::BadMessage("empty header name"));
            }
            let name = std::str::from_utf8(&line[..colon])
                .map_err(|_| Error::BadMessage("bad encoding"))?;
            if name.ends_with(' ') || name.ends_with('\t') {
                return Err(Error::BadMessage("space before colon"));
            }
            let value = std::str::from_utf8(&line[colon + 1..])
                .map_err(|_| Error::BadMessage("bad encoding"))?
                .trim_matches([' ', '\t']);
            head.headers_mut().append(name, value);
        }

        let framing = body_framing(&head)?;
        self.pos += header_len + 2; // include the blank line
        self.head = head;
        self.got_header = true;
        self.state = framing;
        Ok(())
    }

    fn take_body(&mut self, take: usize) -> Result<(), Error> {
        if self.body_received + take as u64 > self.cfg.max_body_size {
            return Err(Error::BodyTooLarge);
        }
        self.body
            .extend_from_slice(&self.buf[self.pos..self.pos + take]);
        self.pos += take;
        self.body_received += take as u64;
        Ok(())
    }
}

fn body_framing<H: HeadDecode>(head: &H) -> Result<State, Error> {
    if head.never_has_body() {
        return Ok(State::Complete);
    }
    let chunked = head
        .headers()
        .get("Transfer-Encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);
    let content_length = match head.headers().get("Content-Length") {
        Some(v) => Some(
            v.trim()
                .parse::<u64>()
                .map_err(|_| Error::BadFraming("invalid content-length"))?,
        ),
        None => None,
    };
    match (chunked, content_length) {
        (true, Some(_)) => Err(Error::BadFraming("both content-length and chunked")),
        (true, None) => Ok(State::ChunkSize),
        (false, Some(0)) => Ok(State::Complete),
        (false, Some(n)) => Ok(State::Body(n)),
        (false, None) => {
            if H::IS_RESPONSE {
                Ok(State::BodyToEof)
            } else {
                Ok(State::Complete)
            }
        }
    }
}

impl<H: HeadDecode> Parser for Http1Parser<H> {
    type Head = H;

    fn reset(&mut self) {
        self.len = 0;
        self.pos = 0;
        self.eof = false;
        self.state = State::Idle;
        self.start_message();
        self.state = State::Idle;
    }

    fn start(&mut self) {
        self.start_message();
    }

    fn parse(&mut self) -> Result<(), Error> {
        loop {
            match self.state {
                State::Idle => return Err(Error::BadMessage("parser not started")),
                State::Header => {
                    // tolerate blank lines before the start line
                    while self.len - self.pos >= 2 && &self.buf[self.pos..self.pos + 2] == b"\r\n" {
                        self.pos += 2;
                    }
                    let window = &self.buf[self.pos..self.len];
                    match memmem::find(window, b"\r\n\r\n") {
                        Some(n) => {
                            self.decode_header(n + 2)?;
                        }
                        None => {
                            if window.len() > self.cfg.max_header_size {
                                return Err(Error::HeaderTooLarge);
                            }
                            if self.eof {
                                if window.is_empty() {
                                    return Err(Error::Eof);
                                }
                                return Err(Error::BadFraming("eof inside header"));
                            }
                            return Err(Error::NeedMoreInput);
                        }
                    }
                }
                State::Body(remaining) => {
                    if remaining == 0 {
                        self.state = State::Complete;
                        continue;
                    }
                    let avail = (self.len - self.pos) as u64;
                    if avail == 0 {
                        if self.eof {
                            return Err(Error::BadFraming("eof inside body"));
                        }
                        return Err(Error::NeedMoreInput);
                    }
                    let take = avail.min(remaining) as usize;
                    self.take_body(take)?;
                    self.state = State::Body(remaining - take as u64);
                }
                State::BodyToEof => {
                    let avail = self.len - self.pos;
                    if avail > 0 {
                        self.take_body(avail)?;
                    }
                    if self.eof {
                        self.state = State::Complete;
                        continue;
                    }
                    return Err(Error::NeedMoreInput);
                }
                State::ChunkSize => {
                    let window = &self.buf[self.pos..self.len];
                    let Some(eol) = memmem::find(window, b"\r\n") else {
                        if self.eof {
                            return Err(Error::BadFraming("eof inside chunk size"));
                        }
                        if window.len() > 18 {
                            return Err(Error::BadFraming("chunk size line too long"));
                        }
                        return Err(Error::NeedMoreInput);
                    };
                    let line = std::str::from_utf8(&window[..eol])
                        .map_err(|_| Error::BadFraming("bad chunk size"))?;
                    // chunk extensions are tolerated and discarded
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_str, 16)
                        .map_err(|_| Error::BadFraming("bad chunk size"))?;
                    self.pos += eol + 2;
                    self.state = if size == 0 {
                        State::Trailer
                    } else {
                        State::ChunkData(size)
                    };
                }
                State::ChunkData(remaining) => {
                    if remaining == 0 {
                        self.state = State::ChunkCrlf;
                        continue;
                    }
                    let avail = (self.len - self.pos) as u64;
                    if avail == 0 {
                        if self.eof {
                            return Err(Error::BadFraming("eof inside chunk"));
                        }
                        return Err(Error::NeedMoreInput);
                    }
                    let take = avail.min(remaining) as usize;
                    self.take_body(take)?;
                    self.state = State::ChunkData(remaining - take as u64);
                }
                State::ChunkCrlf => {
                    if self.len - self.pos < 2 {
                        if self.eof {
                            return Err(Error::BadFraming("eof after chunk"));
                        }
                        return Err(Error::NeedMoreInput);
                    }
                    if &self.buf[self.pos..self.pos + 2] != b"\r\n" {
                        return Err(Error::BadFraming("missing crlf after chunk"));
                    }
                    self.pos += 2;
                    self.state = State::ChunkSize;
                }
                State::Trailer => {
                    let window = &self.buf[self.pos..self.len];
                    let Some(eol) = memmem::find(window, b"\r\n") else {
                        if self.eof {
                            return Err(Error::BadFraming("eof inside trailer"));
                        }
                        return Err(Error::NeedMoreInput);
                    };
                    self.pos += eol + 2;
                    if eol == 0 {
                        // blank line ends the trailer section
                        self.state = State::Complete;
                    }
                    // non-empty trailer fields are discarded
                }
                State::Complete => return Ok(()),
            }
        }
    }

    fn prepare(&mut self) -> &mut [u8] {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.len, 0);
            self.len -= self.pos;
            self.pos = 0;
        }
        if self.buf.len() < self.len + self.cfg.read_buffer_size {
            self.buf.resize(self.len + self.cfg.read_buffer_size, 0);
        }
        &mut self.buf[self.len..]
    }

    fn commit(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.buf.len());
        self.len += n;
    }

    fn commit_eof(&mut self) {
        self.eof = true;
    }

    fn got_header(&self) -> bool {
        self.got_header
    }

    fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    fn head(&self) -> &H {
        &self.head
    }

    fn pull_body(&self) -> &[u8] {
        &self.body[self.body_pos..]
    }

    fn consume_body(&mut self, n: usize) {
        debug_assert!(self.body_pos + n <= self.body.len());
        self.body_pos += n;
        if self.body_pos == self.body.len() {
            self.body.clear();
            self.body_pos = 0;
        }
    }
}
