use crate::{
    conn::scanner::PeekRead,
    errors::{Error, Result, WriteError},
    http::{body::Body, header::RequestHeader, types},
    limits::ReqLimits,
    pool::{self, Pooled, Recycle},
};
use memchr::{memchr, memmem, memrchr};
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

// Size of the copy buffer used by `write_to`.
const COPY_BUF: usize = 8 * 1024;

/// An HTTP/1.x request: the parsed head plus the framing of its body.
///
/// A request is read from a [`PeekRead`] source and never keeps a reference
/// to it. The body is read by passing the same source again, either to
/// [`body_reader`](Self::body_reader) or to [`write_to`](Self::write_to).
///
/// # Input format
///
/// | Part       | Template                                  | Example                     |
/// |------------|-------------------------------------------|-----------------------------|
/// | First line | `[METHOD] SP [URI] SP [PROTO] CRLF`       | `GET / HTTP/1.1\r\n`        |
/// | First line | `[METHOD] SP [URI] CRLF`                  | `CONNECT a.com:443\r\n`     |
/// | Header     | `[KEY] ":" [VALUE] CRLF`                  | `Host: a.com\r\n`           |
/// | End        | `CRLF`                                    | `\r\n`                      |
///
/// The body that follows is framed by, in order of precedence,
/// `Transfer-Encoding: chunked`, `Content-Length`, the method (`GET` and
/// `HEAD` have none) or the end of the stream. See [`Body::select`].
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> h1_relay::Result<()> {
/// use h1_relay::{PeekReader, Request};
///
/// let raw = b"POST /submit HTTP/1.1\r\nHost: a.com\r\nContent-Length: 5\r\n\r\nhello";
/// let mut src = PeekReader::new(&raw[..]);
///
/// let mut req = Request::new();
/// assert!(req.read(&mut src).await?);
/// assert_eq!(req.request_uri(), Some("/submit"));
/// assert_eq!(req.host_port()?.to_string(), "a.com:80");
///
/// let body = req.body_reader(&mut src).read_to_end().await?;
/// assert_eq!(body, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Request {
    header: RequestHeader,
    body: Body,
    scratch: Vec<u8>,
}

impl Request {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_limits(limits: &ReqLimits) -> Self {
        Self {
            header: RequestHeader::with_limits(limits),
            body: Body::Empty,
            scratch: Vec::new(),
        }
    }

    /// Builds a request by hand: `METHOD SP URI SP HTTP/1.1`, no headers and
    /// an empty body.
    pub fn new_with_line(method: &[u8], uri: &[u8]) -> Self {
        let mut req = Self::new();
        req.header.set_method(method);
        req.header.set_request_uri(uri);
        req.header.set_proto(b"HTTP/1.1");
        req
    }

    /// Reads the next request head from `src` and selects its body framing.
    ///
    /// Returns `Ok(false)` on a clean end of input before any byte. The
    /// body of the previous request, if any was left unread, is abandoned
    /// first: the caller must have drained it or the stream is out of sync.
    pub async fn read<S: PeekRead>(&mut self, src: &mut S) -> Result<bool> {
        self.body.release();

        if !self.header.read(src).await? {
            return Ok(false);
        }
        self.body = Body::select(&self.header);

        debug!(
            method = self.method().unwrap_or("<binary>"),
            uri = self.request_uri().unwrap_or("<binary>"),
            body = self.body.kind(),
            "request head parsed"
        );
        Ok(true)
    }
}

// Accessors
impl Request {
    #[inline]
    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut RequestHeader {
        &mut self.header
    }

    #[inline]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replaces the body framing chosen by [`read`](Self::read).
    #[inline]
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// The method as text, `None` if it is not valid UTF-8.
    #[inline]
    pub fn method(&self) -> Option<&str> {
        types::as_text(self.header.method())
    }

    /// The request target as text, `None` if it is not valid UTF-8.
    #[inline]
    pub fn request_uri(&self) -> Option<&str> {
        types::as_text(self.header.request_uri())
    }
}

// Body
impl Request {
    /// Borrows the body together with the source it is read from.
    #[inline]
    pub fn body_reader<'a, S: PeekRead>(&'a mut self, src: &'a mut S) -> BodyReader<'a, S> {
        BodyReader {
            body: &mut self.body,
            src,
        }
    }

    /// Writes the head, then copies the body from `src` until its end.
    ///
    /// Returns the number of bytes written. On failure the error of either
    /// phase comes with the number of bytes that reached `sink` before it;
    /// those bytes stay written.
    pub async fn write_to<S, W>(&mut self, src: &mut S, sink: &mut W) -> Result<u64, WriteError>
    where
        S: PeekRead,
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;
        match self.copy_to(src, sink, &mut written).await {
            Ok(()) => Ok(written),
            Err(source) => Err(WriteError { written, source }),
        }
    }

    async fn copy_to<S, W>(&mut self, src: &mut S, sink: &mut W, written: &mut u64) -> Result<()>
    where
        S: PeekRead,
        W: AsyncWrite + Unpin,
    {
        *written += self.header.write_to(sink).await? as u64;

        if self.scratch.len() < COPY_BUF {
            self.scratch.resize(COPY_BUF, 0);
        }
        loop {
            let n = self.body.read(src, &mut self.scratch).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&self.scratch[..n]).await?;
            *written += n as u64;
        }

        sink.flush().await?;
        Ok(())
    }
}

// Routing
impl Request {
    /// Finds the host and port the request is addressed to.
    ///
    /// Looked up in order:
    /// 1. an authority-form target (`CONNECT host:port`)
    /// 2. the authority of an absolute target with a path
    ///    (`http://host:port/path`)
    /// 3. the `Host` header
    ///
    /// Without an explicit port, the port is `443` for targets starting
    /// with `https` and `80` otherwise.
    pub fn host_port(&self) -> Result<HostPort<'_>> {
        let uri = self.header.request_uri();
        let mut addr: &[u8] = &[];

        if memchr(b'/', uri).is_none() && memchr(b':', uri).is_some() {
            addr = uri;
        }
        if let Some(i) = memmem::find(uri, b"://") {
            let rest = &uri[i + 3..];
            // Without a path the `Host` header decides.
            if let Some(end) = memchr(b'/', rest) {
                addr = &rest[..end];
            }
        }
        if addr.is_empty() {
            addr = self.header.get(b"Host").unwrap_or_default();
        }
        if addr.is_empty() {
            return Err(Error::MissingHost);
        }

        // The last colon outside of an IPv6 literal separates the port.
        let colon = memrchr(b':', addr).filter(|&i| memchr(b']', &addr[i..]).is_none());
        let (host, port) = match colon {
            Some(i) => (&addr[..i], parse_port(&addr[i + 1..])?),
            None if uri.starts_with(b"https") => (addr, 443),
            None => (addr, 80),
        };

        let host = types::as_text(host).ok_or(Error::InvalidHost)?;
        Ok(HostPort { host, port })
    }
}

impl Recycle for Request {
    #[inline]
    fn recycle(&mut self) {
        self.header.reset();
        self.body.release();
    }
}

fn parse_port(bytes: &[u8]) -> Result<u16> {
    match types::parse_uint(bytes) {
        Ok((port, len)) if len == bytes.len() => {
            u16::try_from(port).map_err(|_| Error::InvalidPort)
        }
        _ => Err(Error::InvalidPort),
    }
}

/// Destination of a request, borrowed from its head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPort<'a> {
    pub host: &'a str,
    pub port: u16,
}

impl fmt::Display for HostPort<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A request body bound to the source it is read from.
#[derive(Debug)]
pub struct BodyReader<'a, S> {
    body: &'a mut Body,
    src: &'a mut S,
}

impl<S: PeekRead> BodyReader<'_, S> {
    /// Reads the next piece of the body; `Ok(0)` is the end of the body.
    #[inline]
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.body.read(self.src, buf).await
    }

    /// Reads the rest of the body into a new buffer.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0; 1024];
        loop {
            match self.read(&mut buf).await? {
                0 => return Ok(out),
                n => out.extend_from_slice(&buf[..n]),
            }
        }
    }
}

/// Reads a request into a value from the global [pool](crate::pool::requests).
///
/// Returns `Ok(None)` on a clean end of input. On error the request goes
/// straight back to the pool.
pub async fn read_request<S: PeekRead>(src: &mut S) -> Result<Option<Pooled<'static, Request>>> {
    let mut req = pool::requests().acquire();
    match req.read(src).await? {
        true => Ok(Some(req)),
        false => Ok(None),
    }
}

/// Returns `true` for requests addressed to an origin server: neither a
/// `CONNECT` tunnel nor an absolute-URI proxy request.
pub fn is_web_request(req: &Request) -> bool {
    let header = req.header();
    header.method() != b"CONNECT" && memmem::find(header.request_uri(), b"://").is_none()
}
