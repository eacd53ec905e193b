use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use mazurka_core::io::{BodyReadStream, ByteStream, CancelToken, read_header, write};
use mazurka_core::proto::Parser;
use mazurka_core::proto::http1::{
    Body, Http1Serializer, Method, ParserConfig, RequestHead, ResponseParser, SerializerConfig,
};

/// A plain or TLS client connection.
pub enum ClientStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ByteStream for ClientStream {
    async fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ClientStream::Plain(s) => s.read(buf).await,
            ClientStream::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_some(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ClientStream::Plain(s) => s.write(buf).await,
            ClientStream::Tls(s) => s.write(buf).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestBody {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Explicit method; otherwise GET, or POST when a body is given.
    pub method: Option<Method>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    /// Print response heads to stderr.
    pub verbose: bool,
}

pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// The RFC 9110 §15.4 method rewrite on redirect. Returns the method
/// for the next request and whether the body is kept.
pub fn redirect_method(status: u16, method: Method) -> (Method, bool) {
    match status {
        303 => {
            if method == Method::Head {
                (Method::Head, false)
            } else {
                (Method::Get, false)
            }
        }
        // historical client behavior: POST turns into GET
        301 | 302 => {
            if method == Method::Post {
                (Method::Get, false)
            } else {
                (method, true)
            }
        }
        _ => (method, true),
    }
}

/// The request target in origin-form: path plus optional query.
pub fn origin_form(url: &Url) -> String {
    let mut target = url.path().to_owned();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(q) = url.query() {
        target.push('?');
        target.push_str(q);
    }
    target
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match (url.port(), url.port_or_known_default()) {
        (Some(p), Some(d)) if p != d => format!("{host}:{p}"),
        (Some(p), None) => format!("{host}:{p}"),
        _ => host.to_owned(),
    }
}

async fn connect(url: &Url, host: &str, port: u16) -> anyhow::Result<ClientStream> {
    let tcp = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;
    let _ = tcp.set_nodelay(true);
    match url.scheme() {
        "http" => Ok(ClientStream::Plain(tcp)),
        "https" => {
            let mut roots = tokio_rustls::rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let config = tokio_rustls::rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
            let name = tokio_rustls::rustls::pki_types::ServerName::try_from(host.to_owned())
                .context("invalid server name")?;
            let tls = connector
                .connect(name, tcp)
                .await
                .context("tls handshake")?;
            Ok(ClientStream::Tls(Box::new(tls)))
        }
        s => bail!("unsupported scheme {s:?}"),
    }
}

fn build_request(
    url: &Url,
    method: &Method,
    opts: &Options,
    body: Option<&RequestBody>,
) -> RequestHead {
    let mut head = RequestHead::new(method.clone(), origin_form(url));
    head.headers.set("Host", host_header(url));
    head.headers.set("User-Agent", "burl/0.3");
    head.headers.set("Accept", "*/*");
    // one connection per exchange
    head.headers.set("Connection", "close");
    if let Some(b) = body {
        head.headers.set("Content-Type", b.content_type.clone());
    }
    for (name, value) in &opts.headers {
        head.headers.set(name, value.clone());
    }
    head
}

/// Fetch `url`, streaming the response body into `out`. Returns the
/// final status code.
pub async fn fetch(url: &str, opts: &Options, out: &mut dyn Write) -> anyhow::Result<u16> {
    let mut url = Url::parse(url).context("invalid url")?;
    let mut method = opts
        .method
        .clone()
        .unwrap_or(if opts.body.is_some() {
            Method::Post
        } else {
            Method::Get
        });
    let mut body = opts.body.clone();
    let mut redirects = 0u32;
    let cancel = CancelToken::new();

    loop {
        let host = url
            .host_str()
            .map(str::to_owned)
            .context("url has no host")?;
        let port = url.port_or_known_default().context("url has no port")?;
        let mut stream = connect(&url, &host, port).await?;

        let head = build_request(&url, &method, opts, body.as_ref());
        let mut serializer = Http1Serializer::new(SerializerConfig::default());
        let payload = match &body {
            Some(b) => Body::from(b.data.clone()),
            None => Body::Empty,
        };
        serializer.start(&head, payload);
        write(&mut stream, &mut serializer, &cancel).await?;

        let mut parser = ResponseParser::new(ParserConfig {
            max_body_size: u64::MAX,
            ..ParserConfig::default()
        });
        parser.reset();
        parser.start();
        read_header(&mut stream, &mut parser, &cancel).await?;

        let status = parser.head().status;
        if opts.verbose {
            eprintln!(
                "< {} {} {}",
                parser.head().version.as_str(),
                status,
                mazurka_core::proto::http1::reason_phrase(status)
            );
            for (name, value) in parser.head().headers.iter() {
                eprintln!("< {name}: {value}");
            }
        }

        if opts.follow_redirects && is_redirect(status) {
            if let Some(location) = parser.head().headers.get("Location") {
                if redirects >= opts.max_redirects {
                    bail!("maximum redirects ({}) exceeded", opts.max_redirects);
                }
                redirects += 1;
                url = url.join(location).context("invalid redirect location")?;
                let (next, keep_body) = redirect_method(status, method);
                method = next;
                if !keep_body {
                    body = None;
                }
                continue;
            }
        }

        // HEAD responses carry framing headers but no body
        if method != Method::Head {
            let mut body_stream = BodyReadStream::new(&mut stream, &mut parser);
            let mut buf = [0u8; 8 * 1024];
            loop {
                let n = body_stream.read_some(&mut buf).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
            out.flush()?;
        }
        return Ok(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_rewrites_methods() {
        assert_eq!(redirect_method(303, Method::Post), (Method::Get, false));
        assert_eq!(redirect_method(303, Method::Head), (Method::Head, false));
        assert_eq!(redirect_method(301, Method::Post), (Method::Get, false));
        assert_eq!(redirect_method(302, Method::Put), (Method::Put, true));
        assert_eq!(redirect_method(307, Method::Post), (Method::Post, true));
        assert_eq!(redirect_method(308, Method::Post), (Method::Post, true));
    }

    #[test]
    fn origin_form_keeps_query() {
        let url = Url::parse("http://example.com/a/b?x=1&y=2").unwrap();
        assert_eq!(origin_form(&url), "/a/b?x=1&y=2");
        let url = Url::parse("http://example.com").unwrap();
        assert_eq!(origin_form(&url), "/");
    }

    #[test]
    fn host_header_includes_nonstandard_port() {
        let url = Url::parse("http://example.com:8080/").unwrap();
        assert_eq!(host_header(&url), "example.com:8080");
        let url = Url::parse("http://example.com/").unwrap();
        assert_eq!(host_header(&url), "example.com");
        let url = Url::parse("https://example.com:443/").unwrap();
        assert_eq!(host_header(&url), "example.com");
    }
}
