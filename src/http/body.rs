use crate::{
    conn::scanner::{peek_until, PeekRead, Scan},
    errors::{Error, Fault, Result},
    http::{header::RequestHeader, types::CRLF},
};
use std::mem;
use tracing::trace;

/// How the body of a request is framed, together with the read state.
///
/// Exactly one variant is attached to a [`Request`](crate::Request) at a time.
/// None of them hold the stream: reads borrow it for the duration of the
/// call, so a body can never outlive the connection it was parsed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    /// No body; the first read reports end of data.
    #[default]
    Empty,
    /// Exactly `remaining` more bytes.
    Bounded { remaining: u64 },
    /// `Transfer-Encoding: chunked`, passed through frame by frame.
    Chunked(ChunkedDecoder),
    /// Everything until the peer closes the stream.
    Unbounded,
}

impl Body {
    /// Picks the framing from the parsed head, first match wins:
    ///
    /// 1. `Transfer-Encoding` mentions `chunked`
    /// 2. `Content-Length` is above zero
    /// 3. the method is `GET` or `HEAD`
    /// 4. anything else (e.g. `CONNECT`, or `POST` with `Content-Length: 0`)
    ///    reads until close
    pub fn select(header: &RequestHeader) -> Self {
        if header.chunked_encoding() {
            Body::Chunked(ChunkedDecoder::new())
        } else if let Some(remaining) = header.content_length().filter(|&len| len > 0) {
            Body::Bounded { remaining }
        } else if matches!(header.method(), b"GET" | b"HEAD") {
            Body::Empty
        } else {
            Body::Unbounded
        }
    }

    /// Short name of the variant, for logs.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Empty => "empty",
            Body::Bounded { .. } => "bounded",
            Body::Chunked(_) => "chunked",
            Body::Unbounded => "unbounded",
        }
    }

    /// Reads the next piece of the body from `src` into `buf`.
    ///
    /// `Ok(0)` is a clean end of data. A stream that ends before the framing
    /// says it should is reported as [`Error::UnexpectedEndOfStream`].
    pub async fn read<S: PeekRead>(&mut self, src: &mut S, buf: &mut [u8]) -> Result<usize> {
        match self {
            Body::Empty => Ok(0),
            Body::Bounded { remaining } => {
                if *remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }

                let want = buf.len().min(clamp(*remaining));
                match src.read(&mut buf[..want]).await? {
                    0 => Err(Error::UnexpectedEndOfStream),
                    n => {
                        *remaining -= n as u64;
                        Ok(n)
                    }
                }
            }
            Body::Chunked(decoder) => decoder.read(src, buf).await,
            Body::Unbounded => Ok(src.read(buf).await?),
        }
    }

    // Returns the body to its idle state.
    #[inline]
    pub(crate) fn release(&mut self) {
        if let Body::Chunked(decoder) = mem::take(self) {
            if !decoder.is_done() {
                trace!("chunked body released before its terminator");
            }
        }
    }
}

// CHUNKED

/// Incremental reader for `Transfer-Encoding: chunked` bodies.
///
/// The decoder validates the framing but does not strip it: the bytes it
/// yields are the wire bytes of the body, chunk-size lines and CRLFs
/// included, ending right after the terminating `0\r\n\r\n`. A proxy can
/// forward them untouched while still knowing where the message ends.
///
/// Output does not depend on the size of the caller's buffers; reading one
/// byte at a time yields the same stream as reading it all at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedDecoder {
    // Bytes left in the current unit: size line, data and trailing CRLF.
    remaining: u64,
    // The zero-size chunk was seen.
    terminal: bool,
    fault: Option<Fault>,
}

impl ChunkedDecoder {
    #[inline]
    pub const fn new() -> Self {
        Self {
            remaining: 0,
            terminal: false,
            fault: None,
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Returns `true` once the whole body, terminator included, was read.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.terminal && self.remaining == 0 && self.fault.is_none()
    }

    /// Reads framed body bytes into `buf`.
    ///
    /// Errors are sticky: after a failure every call returns the same error.
    /// Bytes copied before a failure, transport failures included, are
    /// returned first and the error is reported on the next call. A deferred
    /// I/O error keeps only its [`kind`](std::io::Error::kind).
    pub async fn read<S: PeekRead>(&mut self, src: &mut S, buf: &mut [u8]) -> Result<usize> {
        if let Some(fault) = self.fault {
            return Err(fault.into());
        }

        let mut n = 0;
        let mut failure = None;
        while n < buf.len() {
            if self.remaining > 0 {
                let want = (buf.len() - n).min(clamp(self.remaining));
                let dst = &mut buf[n..n + want];

                let got = match src.read(dst).await {
                    Ok(0) => {
                        failure = Some(Error::UnexpectedEndOfStream);
                        break;
                    }
                    Ok(got) => got,
                    Err(err) => {
                        failure = Some(err.into());
                        break;
                    }
                };
                n += got;
                self.remaining -= got as u64;

                // Only checked when this read copied more than the CRLF itself.
                if self.remaining == 0 && got > 2 && &dst[got - 2..got] != CRLF {
                    failure = Some(Error::InvalidChunkEnding);
                    break;
                }
                continue;
            }

            if self.terminal {
                break;
            }

            if let Err(err) = self.begin_chunk(src).await {
                failure = Some(err);
                break;
            }
        }

        if let Some(err) = failure {
            self.fault = Some(Fault::from(&err));
            if n == 0 {
                return Err(err);
            }
        }
        Ok(n)
    }

    // Peeks the next chunk-size line and sizes the unit to pass through.
    async fn begin_chunk<S: PeekRead>(&mut self, src: &mut S) -> Result<()> {
        let len = match peek_until(src, CRLF).await? {
            Scan::Found(len) => len,
            Scan::Exhausted(_) => return Err(Error::UnexpectedEndOfStream),
        };

        let size = parse_chunk_size(&src.buffered()[..len])?;
        trace!(size, "chunk");

        if size == 0 {
            self.terminal = true;
        }
        self.remaining = size
            .checked_add(len as u64 + 2)
            .ok_or(Error::ChunkLengthTooLarge)?;

        Ok(())
    }
}

#[inline]
fn clamp(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Parses the hex size at the start of a chunk-size line.
///
/// The number ends at `;` (chunk extensions are ignored), CR or LF. At most
/// 16 hex digits are accepted.
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<u64, Fault> {
    if line.is_empty() {
        return Err(Fault::HeaderLength);
    }

    let mut size: u64 = 0;
    for (i, &byte) in line.iter().enumerate() {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            b';' | b'\r' | b'\n' if i == 0 => return Err(Fault::HeaderLength),
            b';' | b'\r' | b'\n' => return Ok(size),
            _ => return Err(Fault::Header),
        };
        if i == 16 {
            return Err(Fault::TooLarge);
        }
        size = (size << 4) | u64::from(digit);
    }

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::scanner::{tests::Trickle, PeekReader};
    use crate::tools::str_op;
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::{AsyncRead, ReadBuf};

    /// Hands out its data in one read, then fails every later read.
    struct Severed {
        data: Option<Vec<u8>>,
    }

    impl Severed {
        fn new(data: &[u8]) -> Self {
            Self {
                data: Some(data.to_vec()),
            }
        }
    }

    impl AsyncRead for Severed {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::ErrorKind::ConnectionReset.into())),
            }
        }
    }

    async fn head(raw: &[u8]) -> RequestHeader {
        let input = [raw, CRLF].concat();
        let mut header = RequestHeader::new();
        assert!(header.read(&mut PeekReader::new(&input[..])).await.unwrap());
        header
    }

    const WIKI: &[u8] = b"4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\n";

    async fn read_all<S: PeekRead>(
        decoder: &mut ChunkedDecoder,
        src: &mut S,
        size: usize,
    ) -> (Vec<u8>, Result<()>) {
        let mut out = Vec::new();
        let mut buf = vec![0; size];
        loop {
            match decoder.read(src, &mut buf).await {
                Ok(0) => return (out, Ok(())),
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(err) => return (out, Err(err)),
            }
        }
    }

    async fn read_chunked(input: &[u8]) -> (Vec<u8>, Result<()>) {
        let mut src = PeekReader::new(input);
        read_all(&mut ChunkedDecoder::new(), &mut src, 512).await
    }

    #[test]
    fn chunk_size() {
        #[rustfmt::skip]
        let cases: [(&[u8], Result<u64, Fault>); 10] = [
            (b"0",                   Ok(0)),
            (b"24",                  Ok(0x24)),
            (b"F3;  ",               Ok(0xF3)),
            (b"a\r\n",               Ok(0xA)),
            (b"ffffffffffffffff\r\n", Ok(u64::MAX)),
            (b"24***\r\n",           Err(Fault::Header)),
            (b"\r\n",                Err(Fault::HeaderLength)),
            (b";ext\r\n",            Err(Fault::HeaderLength)),
            (b"",                    Err(Fault::HeaderLength)),
            (b"10000000000000000\r\n", Err(Fault::TooLarge)),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_chunk_size(input), expected, "{:?}", str_op(input));
        }
    }

    #[tokio::test]
    async fn passes_framing_through() {
        let ok = b"5\r\nhello\r\n0\r\n\r\n";
        let (out, res) = read_chunked(ok).await;
        assert!(res.is_ok());
        assert_eq!(out, ok);

        let (out, res) = read_chunked(WIKI).await;
        assert!(res.is_ok());
        assert_eq!(out, WIKI);
    }

    #[tokio::test]
    async fn stops_at_terminator() {
        let mut input = WIKI.to_vec();
        input.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");

        let mut src = PeekReader::new(&input[..]);
        let mut decoder = ChunkedDecoder::new();
        let (out, res) = read_all(&mut decoder, &mut src, 7).await;

        assert!(res.is_ok());
        assert!(decoder.is_done());
        assert_eq!(out, WIKI);
        assert_eq!(src.buffered(), b"GET / HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn malformed_framing() {
        #[rustfmt::skip]
        let cases: [(&[u8], fn(&Error) -> bool); 5] = [
            (b"5\r\nhello**0\r\n\r\n",     |e| matches!(e, Error::InvalidChunkEnding)),
            (b"5\r\nhello\r\n\r\n0\r\n\r\n", |e| matches!(e, Error::InvalidChunkHeaderLength)),
            (b"5\r\nhello\r\nzz\r\n",      |e| matches!(e, Error::InvalidChunkHeader)),
            (b"5\r\nhello\r\n0\r\n",       |e| matches!(e, Error::UnexpectedEndOfStream)),
            (b"5\r\nhel",                  |e| matches!(e, Error::UnexpectedEndOfStream)),
        ];

        for (input, check) in cases {
            let (_, res) = read_chunked(input).await;
            let err = res.unwrap_err();
            assert!(check(&err), "{:?}: {err:?}", str_op(input));
        }
    }

    #[tokio::test]
    async fn errors_are_sticky() {
        let mut src = PeekReader::new(&b"5\r\nhello**0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();
        let mut buf = [0; 64];

        // The bad unit is handed out before the error surfaces.
        assert_eq!(decoder.read(&mut src, &mut buf).await.unwrap(), 10);
        for _ in 0..3 {
            let err = decoder.read(&mut src, &mut buf).await.unwrap_err();
            assert!(matches!(err, Error::InvalidChunkEnding));
        }
    }

    #[tokio::test]
    async fn size_invariant() {
        for size in 1..=100 {
            let mut src = PeekReader::new(WIKI);
            let (out, res) = read_all(&mut ChunkedDecoder::new(), &mut src, size).await;
            assert!(res.is_ok(), "buffer size {size}");
            assert_eq!(out, WIKI, "buffer size {size}");
        }

        // Same again with a stream that delivers one byte at a time.
        for size in [1, 2, 3, 64] {
            let mut src = PeekReader::new(Trickle::new(WIKI));
            let (out, res) = read_all(&mut ChunkedDecoder::new(), &mut src, size).await;
            assert!(res.is_ok(), "buffer size {size}");
            assert_eq!(out, WIKI, "buffer size {size}");
        }
    }

    #[tokio::test]
    async fn short_terminating_read_skips_ending_check() {
        let input = b"1\r\nxAB\r\n0\r\n\r\n";

        let mut src = PeekReader::new(&input[..]);
        let (_, res) = read_all(&mut ChunkedDecoder::new(), &mut src, 64).await;
        assert!(matches!(res, Err(Error::InvalidChunkEnding)));

        // With 2-byte reads the last copy of the unit is only 2 bytes, so the
        // bad ending slips through and the following size line fails instead.
        let mut src = PeekReader::new(&input[..]);
        let (_, res) = read_all(&mut ChunkedDecoder::new(), &mut src, 2).await;
        assert!(matches!(res, Err(Error::InvalidChunkHeaderLength)));
    }

    #[tokio::test]
    async fn bounded_and_unbounded() {
        let mut src = PeekReader::new(&b"12345tail"[..]);
        let mut body = Body::Bounded { remaining: 5 };
        let mut buf = [0; 3];

        assert_eq!(body.read(&mut src, &mut buf).await.unwrap(), 3);
        assert_eq!(body.read(&mut src, &mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"45");
        assert_eq!(body.read(&mut src, &mut buf).await.unwrap(), 0);

        let mut body = Body::Unbounded;
        let mut rest = [0; 16];
        assert_eq!(body.read(&mut src, &mut rest).await.unwrap(), 4);
        assert_eq!(body.read(&mut src, &mut rest).await.unwrap(), 0);

        let mut src = PeekReader::new(&b"123"[..]);
        let mut body = Body::Bounded { remaining: 5 };
        assert_eq!(body.read(&mut src, &mut rest).await.unwrap(), 3);
        assert!(matches!(
            body.read(&mut src, &mut rest).await,
            Err(Error::UnexpectedEndOfStream)
        ));

        let mut body = Body::Empty;
        assert_eq!(body.read(&mut src, &mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn selection() {
        #[rustfmt::skip]
        let cases: [(&[u8], Body); 8] = [
            (b"GET / HTTP/1.1\r\n",                                      Body::Empty),
            (b"HEAD / HTTP/1.1\r\nContent-Length: 0\r\n",                Body::Empty),
            (b"GET / HTTP/1.1\r\nContent-Length: 0\r\n",                 Body::Empty),
            (b"POST /x HTTP/1.1\r\nContent-Length: 0\r\n",               Body::Unbounded),
            (b"POST /x HTTP/1.1\r\n",                                    Body::Unbounded),
            (b"PUT /x HTTP/1.1\r\nContent-Length: 7\r\n",                Body::Bounded { remaining: 7 }),
            (b"POST /x HTTP/1.1\r\nContent-Length: 7\r\nTransfer-Encoding: chunked\r\n",
                                                                         Body::Chunked(ChunkedDecoder::new())),
            (b"CONNECT a.com:443 HTTP/1.1\r\n",                          Body::Unbounded),
        ];

        for (raw, expected) in cases {
            assert_eq!(Body::select(&head(raw).await), expected, "{:?}", str_op(raw));
        }
    }

    #[tokio::test]
    async fn transport_error_after_data() {
        let mut src = PeekReader::new(Severed::new(b"5\r\nhello\r\n"));
        let mut decoder = ChunkedDecoder::new();
        let mut buf = [0; 64];

        // The unit read before the failure is not lost.
        assert_eq!(decoder.read(&mut src, &mut buf).await.unwrap(), 10);
        assert_eq!(&buf[..10], b"5\r\nhello\r\n");
        assert!(!decoder.is_done());

        for _ in 0..2 {
            let err = decoder.read(&mut src, &mut buf).await.unwrap_err();
            assert!(
                matches!(&err, Error::Io(err) if err.kind() == io::ErrorKind::ConnectionReset),
                "{err:?}"
            );
        }
    }

    #[tokio::test]
    async fn transport_error_mid_chunk() {
        let mut src = PeekReader::new(Severed::new(b"5\r\nhel"));
        let mut decoder = ChunkedDecoder::new();
        let mut buf = [0; 64];

        // The size line and partial data come out, then the reset.
        assert_eq!(decoder.read(&mut src, &mut buf).await.unwrap(), 6);
        assert_eq!(&buf[..6], b"5\r\nhel");
        let err = decoder.read(&mut src, &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
