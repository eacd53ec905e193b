//! The per-connection HTTP session: read a request, route it, write
//! the response, honor keep-alive and graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::error::Error;
use crate::io::{ByteStream, CancelToken, read, write};
use crate::proto::{Parser, Serializer};
use crate::proto::http1::{
    ParserConfig, RequestParser, SerializerConfig, StatusCode, reason_phrase,
};
use crate::router::{Request, Response, RouteResult, Router};

/// Properties of the endpoint a connection was accepted on.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptorConfig {
    pub is_tls: bool,
    pub is_admin: bool,
}

/// Minimal HTML error body per the status code.
pub fn error_body(status: StatusCode) -> String {
    let reason = reason_phrase(status);
    format!(
        "<html><head><title>{status} {reason}</title></head>\
         <body><h1>{status} {reason}</h1></body></html>"
    )
}

/// One instance per connection. Drives the loop
/// `read → dispatch → write → keep-alive?`, lets handlers detach and
/// resume, and answers `503 Service Unavailable` once the server is
/// stopping.
pub struct HttpSession<S> {
    id: u64,
    stream: S,
    router: Router,
    config: AcceptorConfig,
    parser: RequestParser,
    req: Request,
    res: Response,
    cancel: CancelToken,
    stopping: Arc<AtomicBool>,
}

impl<S: ByteStream> HttpSession<S> {
    pub fn new(
        id: u64,
        stream: S,
        router: Router,
        config: AcceptorConfig,
        parser_cfg: ParserConfig,
        serializer_cfg: SerializerConfig,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            stream,
            router,
            config,
            parser: RequestParser::new(parser_cfg),
            req: Request::new(),
            res: Response::new(serializer_cfg),
            cancel: CancelToken::new(),
            stopping,
        }
    }

    /// Token that interrupts the session's pending I/O; used by the
    /// worker pool on forced stop.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Replace the session's cancel token with one owned by the
    /// caller.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Run the session until the connection closes.
    ///
    /// Clean closures (end of stream, reset, cancellation) return
    /// `Ok`; anything else is a genuine failure the caller may log.
    pub async fn run(&mut self) -> Result<(), Error> {
        self.parser.reset();
        self.res.data.clear();
        trace!(
            id = self.id,
            tls = self.config.is_tls,
            admin = self.config.is_admin,
            "session begin",
        );

        loop {
            self.parser.start();
            self.res.reset_message();

            if let Err(e) = read(&mut self.stream, &mut self.parser, &self.cancel).await {
                if e.is_disconnect() {
                    trace!(id = self.id, "session closed: {e}");
                    return Ok(());
                }
                debug!(id = self.id, "read failed: {e}");
                return Err(e);
            }
            debug_assert!(self.parser.is_complete());

            let head = self.parser.head().clone();
            let body = self.parser.pull_body().to_vec();
            self.parser.consume_body(body.len());

            trace!(
                id = self.id,
                method = %head.method,
                uri = %head.target,
                "request",
            );

            // mirror version and keep-alive onto the response
            self.res.head.version = head.version;
            self.res.head.set_keep_alive(head.keep_alive());

            let stopping = self.stopping.load(Ordering::Acquire);
            let rv = if stopping {
                self.respond_error(503);
                self.res.head.set_keep_alive(false);
                RouteResult::Send
            } else {
                match self.req.prepare(head, body) {
                    Ok(()) => self.run_dispatch().await,
                    Err(e) => {
                        debug!(id = self.id, "bad request target: {e}");
                        self.respond_error(400);
                        RouteResult::Send
                    }
                }
            };

            match rv {
                RouteResult::Close => {
                    trace!(id = self.id, "handler closed connection");
                    return Ok(());
                }
                RouteResult::Complete => {
                    // the handler already serialized everything
                    debug_assert!(self.res.serializer.is_done());
                }
                RouteResult::Send => {
                    self.finish_response();
                    self.write_response().await?;
                }
                RouteResult::Next => {
                    // unhandled request
                    self.respond_error(404);
                    self.finish_response();
                    self.write_response().await?;
                }
                RouteResult::Err(e) => {
                    // error response of last resort
                    debug!(id = self.id, "handler error: {e}");
                    self.respond_error(500);
                    self.res.head.set_keep_alive(false);
                    self.finish_response();
                    self.write_response().await?;
                }
                RouteResult::Detach | RouteResult::NextRoute => unreachable!(),
            }

            if !self.res.head.keep_alive() || self.stopping.load(Ordering::Acquire) {
                return Ok(());
            }
        }
    }

    /// Dispatch into the router, parking on the resume channel each
    /// time a handler detaches.
    async fn run_dispatch(&mut self) -> RouteResult {
        let mut rv = self.router.dispatch(&mut self.req, &mut self.res);
        loop {
            match rv {
                RouteResult::Detach => {
                    assert!(
                        self.res.was_detached(),
                        "handler returned Detach without calling detach()"
                    );
                    let rx = self.res.take_resume_rx().expect("resume channel");
                    trace!(id = self.id, "session detached");
                    // parked here, the session performs no I/O until
                    // the resumer fires; a dropped resumer closes
                    let resume_rv = match rx.await {
                        Ok(rv) => rv,
                        Err(_) => RouteResult::Close,
                    };
                    trace!(id = self.id, "session resumed");
                    self.res.rearm_detach();
                    rv = self.router.resume(&mut self.req, &mut self.res, resume_rv);
                }
                rv => return rv,
            }
        }
    }

    /// Point the response at an error status with the standard HTML
    /// body.
    fn respond_error(&mut self, status: StatusCode) {
        self.res.status(status);
        self.res.header("Content-Type", "text/html");
        self.res.set_body(error_body(status));
    }

    /// Stamp the ambient headers and hand the message to the
    /// serializer, unless a handler already did.
    fn finish_response(&mut self) {
        if self.res.serializer.is_started() {
            return;
        }
        if !self.res.head.headers.contains("Server") {
            self.res.head.headers.set("Server", "mazurka");
        }
        if !self.res.head.headers.contains("Date") {
            self.res
                .head
                .headers
                .set("Date", httpdate::fmt_http_date(std::time::SystemTime::now()));
        }
        let body = std::mem::take(&mut self.res.body);
        self.res.serializer.start(&self.res.head, body);
    }

    async fn write_response(&mut self) -> Result<(), Error> {
        match write(&mut self.stream, &mut self.res.serializer, &self.cancel).await {
            Ok(n) => {
                trace!(id = self.id, bytes = n, "response written");
                debug_assert!(self.res.serializer.is_done());
                Ok(())
            }
            Err(e) if e.is_disconnect() => {
                trace!(id = self.id, "session closed during write: {e}");
                Err(e)
            }
            Err(e) => {
                debug!(id = self.id, "write failed: {e}");
                Err(e)
            }
        }
    }
}
