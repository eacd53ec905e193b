use thiserror::Error;

/// Errors surfaced by the I/O core, the HTTP/1 coder and the server.
#[derive(Debug, Error)]
pub enum Error {
    // -- transport

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("end of stream")]
    Eof,

    #[error("connection reset by peer")]
    Reset,

    #[error("operation cancelled")]
    Cancelled,

    /// The peer closed a TLS stream without a close_notify.
    /// Treated as end-of-stream at shutdown.
    #[error("tls stream truncated")]
    TlsTruncated,

    // -- protocol

    /// Non-fatal underflow: the parser needs more committed input before
    /// it can make progress. Always recovered locally by reading more.
    #[error("need more input")]
    NeedMoreInput,

    #[error("body exceeds configured limit")]
    BodyTooLarge,

    #[error("header section exceeds configured limit")]
    HeaderTooLarge,

    #[error("invalid message framing: {0}")]
    BadFraming(&'static str),

    #[error("malformed message: {0}")]
    BadMessage(&'static str),

    /// The request target could not be parsed as a URL path.
    #[error("invalid request target: {0}")]
    BadTarget(&'static str),

    /// A route pattern failed to compile.
    #[error("invalid route pattern: {0}")]
    BadPattern(String),

    // -- application

    /// A route handler reported failure. Routed to error handlers; if
    /// none accept it, the session answers with 500.
    #[error("handler error: {0}")]
    Handler(String),

    // -- session

    #[error("shutdown grace period elapsed")]
    ShutdownElapsed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Errors that mean "read more and try again", never failure.
    pub fn is_need_more_input(&self) -> bool {
        matches!(self, Error::NeedMoreInput)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True for transport errors that end a connection without being
    /// worth logging at error level.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Eof | Error::Reset | Error::Cancelled | Error::TlsTruncated => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// The HTTP status a session answers with when this error reaches
    /// the response path.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BodyTooLarge => 413,
            Error::HeaderTooLarge => 431,
            Error::BadFraming(_) | Error::BadMessage(_) | Error::BadTarget(_) => 400,
            Error::ShutdownElapsed => 503,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::BodyTooLarge.status_code(), 413);
        assert_eq!(Error::BadFraming("x").status_code(), 400);
        assert_eq!(Error::Handler("boom".into()).status_code(), 500);
    }

    #[test]
    fn disconnect_classification() {
        assert!(Error::Eof.is_disconnect());
        assert!(Error::Reset.is_disconnect());
        assert!(!Error::NeedMoreInput.is_disconnect());
        let io = Error::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(io.is_disconnect());
    }
}
