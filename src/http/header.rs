use crate::{
    conn::scanner::{must_discard, peek_until, PeekRead, Scan},
    errors::{Error, Result},
    http::types::{self, CRLF, CRLFCRLF},
    limits::ReqLimits,
};
use memchr::{memchr, memmem, memrchr};
use std::ops::Range;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// One header line slot.
///
/// Deleting a header empties its slot instead of removing it, so the
/// positions of the remaining lines never shift.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    /// `Key: value` stored at this range of the header buffer, without CRLF.
    Present(Range<usize>),
    Deleted,
}

/// Request line and header section of an HTTP/1.x request.
///
/// Header lines are kept as raw `Key: value` spans in wire order. Keys are
/// canonicalized while reading (`content-length` becomes `Content-Length`)
/// and every lookup compares keys case-insensitively.
///
/// All buffers keep their capacity across [`reset`](Self::reset), so a
/// header reused from a pool parses without allocating once warmed up.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    method: Vec<u8>,
    uri: Vec<u8>,
    proto: Vec<u8>,

    // Raw header section plus any lines written by `add`/`set`.
    raw: Vec<u8>,
    lines: Vec<Entry>,

    raw_capacity: usize,
    max_raw_capacity: usize,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestHeader {
    #[inline]
    pub fn new() -> Self {
        Self::with_limits(&ReqLimits::default())
    }

    pub fn with_limits(limits: &ReqLimits) -> Self {
        Self {
            method: Vec::with_capacity(limits.method_capacity),
            uri: Vec::with_capacity(limits.uri_capacity),
            proto: Vec::with_capacity(limits.proto_capacity),

            raw: Vec::with_capacity(limits.header_bytes),
            lines: Vec::with_capacity(limits.header_lines),

            raw_capacity: limits.header_bytes,
            max_raw_capacity: limits.max_header_bytes,
        }
    }

    /// Truncates every buffer to zero length, keeping its capacity.
    #[inline]
    pub fn reset(&mut self) {
        self.method.clear();
        self.uri.clear();
        self.proto.clear();
        self.lines.clear();

        if self.raw.capacity() > self.max_raw_capacity {
            self.raw = Vec::with_capacity(self.raw_capacity);
        } else {
            self.raw.clear();
        }
    }
}

// Read
impl RequestHeader {
    /// Reads the request line and headers from `src`.
    ///
    /// Returns `Ok(false)` if the stream ended cleanly before the first byte
    /// of a request. A stream that ends anywhere after that is
    /// [`Error::UnexpectedEndOfStream`]. On success exactly the head has been
    /// consumed and `src` is positioned at the first byte of the body.
    pub async fn read<S: PeekRead>(&mut self, src: &mut S) -> Result<bool> {
        self.reset();

        let len = match peek_until(src, CRLF).await? {
            Scan::Found(len) => len,
            Scan::Exhausted(0) => return Ok(false),
            Scan::Exhausted(_) => return Err(Error::UnexpectedEndOfStream),
        };
        self.parse_first_line(&src.buffered()[..len - CRLF.len()])?;
        must_discard(src, len);

        // No headers at all: the request line is followed by the blank line.
        let head = src.peek(2).await?;
        if head.len() < 2 {
            return Err(Error::UnexpectedEndOfStream);
        }
        if head == CRLF {
            must_discard(src, 2);
            return Ok(true);
        }

        let len = match peek_until(src, CRLFCRLF).await? {
            Scan::Found(len) => len,
            Scan::Exhausted(_) => return Err(Error::UnexpectedEndOfStream),
        };
        self.raw.extend_from_slice(&src.buffered()[..len]);
        must_discard(src, len);

        self.split_lines();
        Ok(true)
    }

    /// Splits `METHOD SP URI [SP PROTO]` into its parts.
    ///
    /// The method ends at the first space and the protocol starts after the
    /// last one, so a URI may itself contain spaces. Without a second space
    /// the whole remainder is the URI and the protocol is empty.
    pub fn parse_first_line(&mut self, line: &[u8]) -> Result<()> {
        let n = memchr(b' ', line)
            .filter(|&n| n > 0)
            .ok_or(Error::InvalidRequestLine("missing method"))?;
        let (method, rest) = (&line[..n], &line[n + 1..]);

        let (uri, proto) = match memrchr(b' ', rest) {
            Some(0) => return Err(Error::InvalidRequestLine("empty request URI")),
            Some(n) => (&rest[..n], &rest[n + 1..]),
            None => (rest, &b""[..]),
        };

        set_bytes(&mut self.method, method);
        set_bytes(&mut self.uri, uri);
        set_bytes(&mut self.proto, proto);
        Ok(())
    }

    // Records one entry per non-empty line of the raw section and
    // canonicalizes its key.
    fn split_lines(&mut self) {
        let mut start = 0;
        for end in memmem::find_iter(&self.raw, CRLF) {
            if end > start {
                self.lines.push(Entry::Present(start..end));
            }
            start = end + CRLF.len();
        }

        for entry in &self.lines {
            if let Entry::Present(range) = entry {
                types::normalize_key(&mut self.raw[range.clone()]);
            }
        }
    }
}

// Request line
impl RequestHeader {
    #[inline]
    pub fn method(&self) -> &[u8] {
        &self.method
    }

    #[inline]
    pub fn request_uri(&self) -> &[u8] {
        &self.uri
    }

    #[inline]
    pub fn proto(&self) -> &[u8] {
        &self.proto
    }

    #[inline]
    pub fn set_method(&mut self, method: &[u8]) {
        set_bytes(&mut self.method, method);
    }

    #[inline]
    pub fn set_request_uri(&mut self, uri: &[u8]) {
        set_bytes(&mut self.uri, uri);
    }

    #[inline]
    pub fn set_proto(&mut self, proto: &[u8]) {
        set_bytes(&mut self.proto, proto);
    }
}

// Lookup
impl RequestHeader {
    /// Returns the value of the first header named `key`, leading spaces
    /// trimmed.
    ///
    /// # Examples
    ///
    /// For `Host: baidu.com`:
    /// - at the key `b"host"`: `Some(b"baidu.com")`
    /// - at the key `b"Hos"`: `None`
    #[inline]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.present().find_map(|(_, line)| value_of(line, key))
    }

    /// Iterates over the values of every header named `key`, in wire order.
    pub fn values<'a>(&'a self, key: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.find(key).map(|(_, value)| value)
    }

    /// Iterates over the `(key, value)` pairs of all present lines.
    pub fn lines(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.present().filter_map(|(_, line)| split_header_line(line))
    }

    /// Number of present header lines.
    #[inline]
    pub fn len(&self) -> usize {
        self.present().count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    /// Returns `true` if a `Transfer-Encoding` value contains `chunked`.
    ///
    /// This is a substring match, so `gzip; chunked;` counts.
    pub fn chunked_encoding(&self) -> bool {
        self.values(b"Transfer-Encoding")
            .any(|value| memmem::find(value, b"chunked").is_some())
    }

    /// Returns the first `Content-Length`, or `None` if it is missing or does
    /// not start with a digit.
    pub fn content_length(&self) -> Option<u64> {
        let value = self.get(b"Content-Length")?;
        types::parse_uint(value).ok().map(|(len, _)| len)
    }

    fn present(&self) -> impl Iterator<Item = (usize, &[u8])> + '_ {
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| match entry {
                Entry::Present(range) => Some((i, &self.raw[range.clone()])),
                Entry::Deleted => None,
            })
    }

    fn find<'a>(&'a self, key: &'a [u8]) -> impl Iterator<Item = (usize, &'a [u8])> + 'a {
        self.present()
            .filter_map(move |(i, line)| value_of(line, key).map(|value| (i, value)))
    }

    // Slots of every line named `key`, collected so the caller may mutate.
    fn positions(&self, key: &[u8], out: &mut Vec<usize>) {
        out.extend(self.find(key).map(|(i, _)| i));
    }
}

// Mutation
impl RequestHeader {
    /// Appends `key: value`, even if `key` is already present.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        if key.is_empty() {
            return;
        }

        let range = self.push_line(key, value);
        self.lines.push(Entry::Present(range));
    }

    /// Empties every line named `key` and returns how many there were.
    pub fn del(&mut self, key: &[u8]) -> usize {
        let mut hits = Vec::new();
        self.positions(key, &mut hits);

        for &i in &hits {
            self.lines[i] = Entry::Deleted;
        }
        hits.len()
    }

    /// Replaces all `key` lines with a single `key: value`.
    ///
    /// The first matching slot is rewritten in place and the others are
    /// emptied. If there was no match the line is appended. Returns the
    /// number of lines that matched.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> usize {
        let mut hits = Vec::new();
        self.positions(key, &mut hits);

        let Some((&first, rest)) = hits.split_first() else {
            self.add(key, value);
            return 0;
        };

        for &i in rest {
            self.lines[i] = Entry::Deleted;
        }
        let range = self.push_line(key, value);
        self.lines[first] = Entry::Present(range);

        hits.len()
    }

    fn push_line(&mut self, key: &[u8], value: &[u8]) -> Range<usize> {
        let start = self.raw.len();
        self.raw.reserve(key.len() + 2 + value.len());
        self.raw.extend_from_slice(key);
        self.raw.extend_from_slice(b": ");
        self.raw.extend_from_slice(value);
        start..self.raw.len()
    }
}

// Write
impl RequestHeader {
    /// Size of the wire form produced by [`encode_into`](Self::encode_into).
    pub fn encoded_len(&self) -> usize {
        let proto = match self.proto.is_empty() {
            true => 0,
            false => 1 + self.proto.len(),
        };
        let lines: usize = self.present().map(|(_, line)| line.len() + 2).sum();

        self.method.len() + 1 + self.uri.len() + proto + 2 + lines + 2
    }

    /// Appends the wire form of the head to `out`: request line, every
    /// present header line, then the blank line.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());

        out.extend_from_slice(&self.method);
        out.push(b' ');
        out.extend_from_slice(&self.uri);
        if !self.proto.is_empty() {
            out.push(b' ');
            out.extend_from_slice(&self.proto);
        }
        out.extend_from_slice(CRLF);

        for (_, line) in self.present() {
            out.extend_from_slice(line);
            out.extend_from_slice(CRLF);
        }
        out.extend_from_slice(CRLF);
    }

    /// Returns the wire form of the head in a freshly allocated buffer.
    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Writes the wire form to `sink`, returning the number of bytes written.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, sink: &mut W) -> Result<usize> {
        let bytes = self.to_bytes();
        sink.write_all(&bytes).await?;
        Ok(bytes.len())
    }
}

/// Splits a `Key: value` line, tolerating spaces on both sides of the colon.
///
/// # Examples
///
/// - `Host: baidu.com` → `(b"Host", b"baidu.com")`
/// - `Host   :    baidu.com` → `(b"Host", b"baidu.com")`
/// - `Invalid` → `None`
pub fn split_header_line(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let colon = memchr(b':', line)?;
    let key = types::trim_end_spaces(&line[..colon]);
    let value = types::trim_start_spaces(&line[colon + 1..]);
    Some((key, value))
}

// Value of `line` if its key is `key`, compared case-insensitively.
#[inline]
fn value_of<'l>(line: &'l [u8], key: &[u8]) -> Option<&'l [u8]> {
    let (name, value) = split_header_line(line)?;
    name.eq_ignore_ascii_case(key).then_some(value)
}

#[inline]
fn set_bytes(dst: &mut Vec<u8>, src: &[u8]) {
    dst.clear();
    dst.extend_from_slice(src);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conn::scanner::{tests::Trickle, PeekReader},
        tools::{str, str_op},
    };

    async fn read_header(lines: &[&str]) -> (RequestHeader, Result<bool>) {
        let input = lines.join("\r\n");
        let mut src = PeekReader::new(input.as_bytes());
        let mut header = RequestHeader::default();
        let res = header.read(&mut src).await;
        (header, res)
    }

    #[tokio::test]
    async fn read_connect() {
        let (h, res) = read_header(&["CONNECT google.com:443 HTTP/1.1", "\r\n"]).await;
        assert!(res.unwrap());
        assert_eq!(h.method(), b"CONNECT");
        assert_eq!(h.request_uri(), b"google.com:443");
        assert_eq!(h.proto(), b"HTTP/1.1");
        assert_eq!(h.content_length(), None);
        assert!(!h.chunked_encoding());
        assert!(h.is_empty());

        let (h, res) = read_header(&["CONNECT google.com:443", "\r\n"]).await;
        assert!(res.unwrap());
        assert_eq!(h.request_uri(), b"google.com:443");
        assert_eq!(h.proto(), b"");
    }

    #[tokio::test]
    async fn read_headers() {
        let (h, res) = read_header(&[
            "GET / HTTP/1.1",
            "Host: baidu.com",
            "Connection: close",
            "Content-Length: 128",
            "Transfer-Encoding: gzip; chunked;",
            "\r\n",
        ])
        .await;

        assert!(res.unwrap());
        assert_eq!(h.method(), b"GET");
        assert_eq!(h.request_uri(), b"/");
        assert_eq!(h.proto(), b"HTTP/1.1");
        assert_eq!(str(h.get(b"Host")), Some("baidu.com"));
        assert_eq!(str(h.get(b"connection")), Some("close"));
        assert_eq!(h.content_length(), Some(128));
        assert!(h.chunked_encoding());
        assert_eq!(h.len(), 4);
    }

    #[tokio::test]
    async fn read_canonicalizes_keys() {
        let (h, res) = read_header(&[
            "POST /upload HTTP/1.1",
            "content-length: 5",
            "X-FORWARDED-FOR: 10.0.0.1",
            "\r\n",
        ])
        .await;

        assert!(res.unwrap());
        let keys: Vec<_> = h.lines().map(|(k, _)| str_op(k)).collect();
        assert_eq!(keys, ["Content-Length", "X-Forwarded-For"]);
        assert_eq!(h.content_length(), Some(5));
    }

    #[tokio::test]
    async fn read_leaves_body_in_source() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody";
        let mut src = PeekReader::new(Trickle::new(input));
        let mut h = RequestHeader::default();

        assert!(h.read(&mut src).await.unwrap());
        assert_eq!(src.peek(4).await.unwrap(), b"body");
    }

    #[tokio::test]
    async fn read_end_of_stream() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<bool>); 7] = [
            (b"",                                   Some(false)),
            (b"GET / HTTP/1.1",                     None),
            (b"GET / HTTP/1.1\r\n",                 None),
            (b"GET / HTTP/1.1\r\n\r",               None),
            (b"GET / HTTP/1.1\r\nHost: a\r\n",      None),
            (b"GET / HTTP/1.1\r\nHost: a\r\n\r\n",  Some(true)),
            (b"GET / HTTP/1.1\r\n\r\n",             Some(true)),
        ];

        for (input, expected) in cases {
            let mut src = PeekReader::new(Trickle::new(input));
            let res = RequestHeader::default().read(&mut src).await;

            match expected {
                Some(parsed) => assert_eq!(res.unwrap(), parsed, "{:?}", str_op(input)),
                None => assert!(
                    matches!(res, Err(Error::UnexpectedEndOfStream)),
                    "{:?}: {res:?}",
                    str_op(input)
                ),
            }
        }
    }

    #[test]
    fn first_line() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1",               Some(("GET", "/", "HTTP/1.1"))),
            ("GET /a b HTTP/1.0",            Some(("GET", "/a b", "HTTP/1.0"))),
            ("CONNECT host:443",             Some(("CONNECT", "host:443", ""))),
            ("GET ",                         Some(("GET", "", ""))),
            ("GET  HTTP/1.1",                None),
            (" / HTTP/1.1",                  None),
            ("GET",                          None),
        ];

        for (line, expected) in cases {
            let mut h = RequestHeader::default();
            let res = h.parse_first_line(line.as_bytes());

            match expected {
                Some((method, uri, proto)) => {
                    assert!(res.is_ok(), "{line:?}");
                    assert_eq!(str_op(h.method()), method);
                    assert_eq!(str_op(h.request_uri()), uri);
                    assert_eq!(str_op(h.proto()), proto);
                }
                None => assert!(matches!(res, Err(Error::InvalidRequestLine(_))), "{line:?}"),
            }
        }
    }

    #[tokio::test]
    async fn get_add_del_set() {
        let (mut h, res) = read_header(&[
            "GET / HTTP/1.1",
            "Host: baidu.com",
            "Connection: close",
            "Content-Length: 128",
            "Transfer-Encoding: chunked",
            "\r\n",
        ])
        .await;
        assert!(res.unwrap());

        assert_eq!(str(h.get(b"Host")), Some("baidu.com"));

        assert!(h.chunked_encoding());
        h.add(b"Transfer-Encoding", b"deflate");
        assert!(h.chunked_encoding());
        assert_eq!(h.del(b"Transfer-Encoding"), 2);
        assert!(!h.chunked_encoding());

        h.add(b"Content-Type", b"application/json");
        assert_eq!(str(h.get(b"Content-Type")), Some("application/json"));

        assert_eq!(h.del(b"Hello-World"), 0);

        h.add(b"Content-Type", b"text/html");
        assert_eq!(h.del(b"content-type"), 2);
        assert_eq!(h.get(b"Content-Type"), None);

        assert_eq!(h.set(b"Host", b"163.com"), 1);
        assert_eq!(str(h.get(b"Host")), Some("163.com"));

        h.add(b"Host", b"google.com");
        assert_eq!(h.set(b"Host", b"iplocation.net"), 2);
        assert_eq!(h.values(b"Host").count(), 1);
        assert_eq!(str(h.get(b"Host")), Some("iplocation.net"));

        assert_eq!(h.set(b"Via", b"1.1 relay"), 0);
        assert_eq!(str(h.get(b"via")), Some("1.1 relay"));

        h.add(b"", b"ignored");
        assert_eq!(
            str_op(&h.to_bytes()),
            "GET / HTTP/1.1\r\n\
             Host: iplocation.net\r\n\
             Connection: close\r\n\
             Content-Length: 128\r\n\
             Via: 1.1 relay\r\n\
             \r\n"
        );
    }

    #[test]
    fn set_keeps_slot_position() {
        let mut h = RequestHeader::default();
        h.parse_first_line(b"GET / HTTP/1.1").unwrap();
        h.add(b"A", b"1");
        h.add(b"Host", b"one");
        h.add(b"B", b"2");
        h.add(b"Host", b"two");

        assert_eq!(h.set(b"host", b"three"), 2);
        let lines: Vec<_> = h.lines().map(|(k, v)| (str_op(k), str_op(v))).collect();
        assert_eq!(lines, [("A", "1"), ("host", "three"), ("B", "2")]);
    }

    #[test]
    fn encoding() {
        let mut h = RequestHeader::default();
        h.parse_first_line(b"CONNECT example.com:443").unwrap();
        assert_eq!(h.to_bytes(), b"CONNECT example.com:443\r\n\r\n");
        assert_eq!(h.encoded_len(), h.to_bytes().len());

        h.set_proto(b"HTTP/1.1");
        h.add(b"Host", b"example.com:443");
        let bytes = h.to_bytes();
        assert_eq!(
            str_op(&bytes),
            "CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n"
        );
        assert_eq!(h.encoded_len(), bytes.len());
    }

    #[test]
    fn header_line_split() {
        #[rustfmt::skip]
        let cases = [
            ("Host: baidu.com",       Some(("Host", "baidu.com"))),
            ("Host   :    baidu.com", Some(("Host", "baidu.com"))),
            ("Empty:",                Some(("Empty", ""))),
            ("Time: 12:30",           Some(("Time", "12:30"))),
            ("Invalid",               None),
        ];

        for (line, expected) in cases {
            let res = split_header_line(line.as_bytes()).map(|(k, v)| (str_op(k), str_op(v)));
            assert_eq!(res, expected, "{line:?}");
        }
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut h = RequestHeader::default();
        h.parse_first_line(b"OPTIONS * HTTP/1.1").unwrap();
        h.add(b"Host", b"x");
        let capacity = h.raw.capacity();

        h.reset();
        assert!(h.method().is_empty() && h.request_uri().is_empty() && h.is_empty());
        assert_eq!(h.raw.capacity(), capacity);

        let mut h = RequestHeader::with_limits(&ReqLimits {
            header_bytes: 8,
            max_header_bytes: 16,
            ..ReqLimits::default()
        });
        h.add(b"X-Large", &[b'a'; 64]);
        h.reset();
        assert!(h.raw.capacity() < 64);
    }
}
