use tokio::sync::oneshot;

use super::RouteResult;
use super::pattern::PatternMatch;
use crate::error::Error;
use crate::proto::Serializer as _;
use crate::proto::http1::{Body, HeaderMap, Method, RequestHead, ResponseHead, SerializerConfig};
use crate::proto::http1::{Http1Serializer, StatusCode};
use crate::store::TypeStore;

/// Decode all percent escapes in a path except `%2F` and `%5C`, which
/// stay encoded so they cannot be confused with segment separators.
fn pct_decode_path(s: &str) -> Result<String, Error> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hex = |b: u8| -> Option<u8> {
            match b {
                b'0'..=b'9' => Some(b - b'0'),
                b'a'..=b'f' => Some(b - b'a' + 10),
                b'A'..=b'F' => Some(b - b'A' + 10),
                _ => None,
            }
        };
        let (Some(hi), Some(lo)) = (
            bytes.get(i + 1).copied().and_then(hex),
            bytes.get(i + 2).copied().and_then(hex),
        ) else {
            return Err(Error::BadTarget("bad percent escape"));
        };
        let c = hi * 16 + lo;
        if c == b'/' || c == b'\\' {
            out.extend_from_slice(&bytes[i..i + 3]);
        } else {
            out.push(c);
        }
        i += 3;
    }
    String::from_utf8(out).map_err(|_| Error::BadTarget("path is not utf-8"))
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PathSave {
    base_len: usize,
    span: (usize, usize),
    params_len: usize,
}

/// The request view handed to route handlers.
///
/// `base_path`/`path` track how much of the decoded request path the
/// enclosing layers have already matched; `params` holds the captures
/// emitted by those matches. `data` is a per-request store for
/// anything middleware wants to pass along.
#[derive(Debug, Default)]
pub struct Request {
    pub head: RequestHead,
    pub body: Vec<u8>,
    pub data: TypeStore,
    query: Option<String>,
    decoded_path: String,
    added_slash: bool,
    base_len: usize,
    span: (usize, usize),
    params: Vec<(String, String)>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a parsed message and derive the routing path from its
    /// target. Fails on targets that are not origin-form or that carry
    /// broken percent encoding.
    pub fn prepare(&mut self, head: RequestHead, body: Vec<u8>) -> Result<(), Error> {
        self.head = head;
        self.body = body;
        self.data.clear();
        self.params.clear();

        let target = self.head.target.as_str();
        if !target.starts_with('/') {
            return Err(Error::BadTarget("target is not origin-form"));
        }
        let (raw_path, query) = match target.find('?') {
            Some(i) => (&target[..i], Some(target[i + 1..].to_owned())),
            None => (target, None),
        };
        self.query = query;
        self.decoded_path = pct_decode_path(raw_path)?;
        self.added_slash = !self.decoded_path.ends_with('/');
        if self.added_slash {
            self.decoded_path.push('/');
        }
        self.reset_path_state();
        Ok(())
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The portion of the request path matched by enclosing layers.
    pub fn base_path(&self) -> &str {
        &self.decoded_path[..self.base_len]
    }

    /// The remainder of the request path, relative to `base_path`.
    /// Never empty: a fully-consumed path reads as `/`.
    pub fn path(&self) -> &str {
        &self.decoded_path[self.span.0..self.span.1]
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub(crate) fn reset_path_state(&mut self) {
        self.base_len = 0;
        self.span = (
            0,
            self.decoded_path.len() - usize::from(self.added_slash),
        );
        self.params.clear();
    }

    pub(crate) fn adjust_path(&mut self, m: PatternMatch) -> PathSave {
        let save = PathSave {
            base_len: self.base_len,
            span: self.span,
            params_len: self.params.len(),
        };
        self.base_len += m.consumed;
        let (s, e) = self.span;
        if m.consumed < e - s {
            self.span = (s + m.consumed, e);
        } else {
            // pad with the soft trailing slash so downstream handlers
            // always see a non-empty path
            self.span = (self.decoded_path.len() - 1, self.decoded_path.len());
        }
        self.params.extend(m.captures);
        save
    }

    pub(crate) fn restore_path(&mut self, save: PathSave) {
        self.base_len = save.base_len;
        self.span = save.span;
        self.params.truncate(save.params_len);
    }
}

/// Resumes a detached dispatch. Returned by [`Response::detach`];
/// invoking it wakes the session, which re-enters the router as though
/// the detached handler had returned `rv`.
#[derive(Debug)]
pub struct Resumer {
    tx: oneshot::Sender<RouteResult>,
}

impl Resumer {
    pub fn resume(self, rv: RouteResult) {
        // the session may already be gone; resuming then is a no-op
        let _ = self.tx.send(rv);
    }
}

/// The response view handed to route handlers.
///
/// Carries the response head and body under construction, the
/// serializer (for handlers that pre-serialize and return
/// `Complete`), a per-session data store, and the router's traversal
/// cursor.
pub struct Response {
    pub head: ResponseHead,
    pub body: Body,
    pub serializer: Http1Serializer,
    /// Session-scoped store: survives keep-alive requests, cleared
    /// when the connection closes.
    pub data: TypeStore,

    pub(crate) pos: usize,
    pub(crate) resume: usize,
    pub(crate) error: Option<Error>,
    pub(crate) resume_with: Option<RouteResult>,
    detach_tx: Option<oneshot::Sender<RouteResult>>,
    resume_rx: Option<oneshot::Receiver<RouteResult>>,
    detached: bool,
}

impl Response {
    pub fn new(cfg: SerializerConfig) -> Self {
        Self {
            head: ResponseHead::default(),
            body: Body::Empty,
            serializer: Http1Serializer::new(cfg),
            data: TypeStore::new(),
            pos: 0,
            resume: 0,
            error: None,
            resume_with: None,
            detach_tx: None,
            resume_rx: None,
            detached: false,
        }
    }

    pub fn status(&mut self, code: StatusCode) -> &mut Self {
        self.head.status = code;
        self
    }

    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.head.headers.set(name, value);
        self
    }

    pub fn set_body(&mut self, body: impl Into<Body>) -> &mut Self {
        self.body = body.into();
        self
    }

    /// Detach the current handler from its session. The handler must
    /// return [`RouteResult::Detach`] immediately afterwards; the
    /// session performs no further I/O on the connection until the
    /// returned [`Resumer`] fires.
    ///
    /// # Panics
    ///
    /// Panics when called twice within one dispatch.
    pub fn detach(&mut self) -> Resumer {
        let tx = self
            .detach_tx
            .take()
            .expect("detach() called twice, or outside dispatch");
        self.resume = self.pos;
        self.detached = true;
        Resumer { tx }
    }

    /// Prepare the traversal cursor and arm a fresh detach channel for
    /// a new dispatch.
    pub(crate) fn begin_dispatch(&mut self) {
        self.pos = 0;
        self.resume = 0;
        self.error = None;
        self.resume_with = None;
        self.detached = false;
        let (tx, rx) = oneshot::channel();
        self.detach_tx = Some(tx);
        self.resume_rx = Some(rx);
    }

    /// Reset the message-building state between keep-alive requests.
    /// The session data store is left alone.
    pub(crate) fn reset_message(&mut self) {
        self.head = ResponseHead::default();
        self.body = Body::Empty;
        self.serializer.reset();
    }

    pub(crate) fn was_detached(&self) -> bool {
        self.detached
    }

    /// Arm a fresh detach channel before re-entering dispatch, so a
    /// handler past the resume point may detach again.
    pub(crate) fn rearm_detach(&mut self) {
        self.detached = false;
        let (tx, rx) = oneshot::channel();
        self.detach_tx = Some(tx);
        self.resume_rx = Some(rx);
    }

    pub(crate) fn take_resume_rx(&mut self) -> Option<oneshot::Receiver<RouteResult>> {
        self.resume_rx.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(target: &str) -> Request {
        let mut req = Request::new();
        req.prepare(RequestHead::new(Method::Get, target), Vec::new())
            .unwrap();
        req
    }

    #[test]
    fn target_splits_query() {
        let req = prepared("/users/42?full=1");
        assert_eq!(req.path(), "/users/42");
        assert_eq!(req.query(), Some("full=1"));
        assert_eq!(req.base_path(), "");
    }

    #[test]
    fn percent_escapes_decode_except_slashes() {
        let req = prepared("/a%20b/c%2Fd");
        assert_eq!(req.path(), "/a b/c%2Fd");
    }

    #[test]
    fn bad_escape_is_rejected() {
        let mut req = Request::new();
        let head = RequestHead::new(Method::Get, "/a%zz");
        assert!(matches!(
            req.prepare(head, Vec::new()),
            Err(Error::BadTarget(_))
        ));
    }

    #[test]
    fn non_origin_form_is_rejected() {
        let mut req = Request::new();
        let head = RequestHead::new(Method::Get, "http://example.com/");
        assert!(matches!(
            req.prepare(head, Vec::new()),
            Err(Error::BadTarget(_))
        ));
    }

    #[test]
    fn adjust_and_restore_round_trip() {
        let mut req = prepared("/api/users");
        let save = req.adjust_path(PatternMatch {
            consumed: 4,
            captures: vec![("v".to_owned(), "1".to_owned())],
        });
        assert_eq!(req.base_path(), "/api");
        assert_eq!(req.path(), "/users");
        assert_eq!(req.param("v"), Some("1"));

        req.restore_path(save);
        assert_eq!(req.base_path(), "");
        assert_eq!(req.path(), "/api/users");
        assert_eq!(req.param("v"), None);
    }

    #[test]
    fn full_consumption_pads_soft_slash() {
        let mut req = prepared("/api");
        req.adjust_path(PatternMatch {
            consumed: 4,
            captures: Vec::new(),
        });
        assert_eq!(req.base_path(), "/api");
        assert_eq!(req.path(), "/");
    }
}
