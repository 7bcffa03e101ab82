use crate::{
    errors::{Error, Result},
    limits::BufLimits,
};
use memchr::memmem;
use std::{future::Future, io};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A buffered byte source that can look ahead without consuming.
///
/// This is the only thing the parsers need from a connection. Bytes returned
/// by [`peek`](Self::peek) stay in the buffer until [`discard`](Self::discard)
/// or [`read`](Self::read) consumes them.
pub trait PeekRead: Send {
    /// Returns the buffered bytes, reading from the underlying stream until
    /// at least `n` are available.
    ///
    /// Fewer than `n` bytes are returned only when the stream has ended.
    fn peek(&mut self, n: usize) -> impl Future<Output = Result<&[u8]>> + Send;

    /// Returns the bytes currently buffered, without any I/O.
    fn buffered(&self) -> &[u8];

    /// Consumes exactly `n` bytes of the buffer.
    ///
    /// Fails if fewer than `n` bytes are buffered.
    fn discard(&mut self, n: usize) -> io::Result<()>;

    /// Reads up to `buf.len()` bytes, draining the buffer first.
    ///
    /// `Ok(0)` means the stream has ended (or `buf` is empty).
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// Result of [`peek_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    /// The delimiter was found; the span up to and including it is this long.
    Found(usize),
    /// The stream ended first with this many bytes buffered.
    Exhausted(usize),
}

/// Peeks until `delim` appears in the buffer, without consuming anything.
///
/// The peek window grows by one byte past the buffered region on every miss,
/// so the source only reads when the buffered bytes have all been searched.
pub(crate) async fn peek_until<S: PeekRead>(src: &mut S, delim: &[u8]) -> Result<Scan> {
    debug_assert!(!delim.is_empty());

    let mut want = 1;
    let mut from = 0;
    loop {
        let buf = src.peek(want).await?;
        if let Some(i) = memmem::find(&buf[from..], delim) {
            return Ok(Scan::Found(from + i + delim.len()));
        }
        if buf.len() < want {
            return Ok(Scan::Exhausted(buf.len()));
        }

        // A delimiter may straddle the old end of the buffer.
        from = (buf.len() + 1).saturating_sub(delim.len());
        want = buf.len() + 1;
    }
}

/// Discards bytes that were already proven buffered by a peek.
#[inline]
#[track_caller]
pub(crate) fn must_discard<S: PeekRead>(src: &mut S, n: usize) {
    if let Err(err) = src.discard(n) {
        panic!("discard({n}) of peeked bytes failed: {err}");
    }
}

//

/// Growable read buffer over an async byte stream.
///
/// Works like a `BufReader`, except that [`peek`](PeekRead::peek) may ask
/// for more bytes than currently fit: the buffer then grows up to
/// [`BufLimits::max_buffer_size`].
#[derive(Debug)]
pub struct PeekReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    end: usize,
    max: usize,
}

impl<R> PeekReader<R> {
    /// Wraps `inner` with the default [`BufLimits`].
    #[inline]
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, BufLimits::default())
    }

    #[inline]
    pub fn with_limits(inner: R, limits: BufLimits) -> Self {
        let size = limits.buffer_size.max(1);

        Self {
            inner,
            buf: vec![0; size],
            pos: 0,
            end: 0,
            max: limits.max_buffer_size.max(size),
        }
    }

    #[inline]
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Returns the stream and whatever was buffered but not yet consumed.
    pub fn into_parts(mut self) -> (R, Vec<u8>) {
        self.buf.truncate(self.end);
        self.buf.drain(..self.pos);
        (self.inner, self.buf)
    }

    #[inline]
    fn available(&self) -> usize {
        self.end - self.pos
    }

    // Moves unread bytes to the front and grows the buffer so that `n` of
    // them fit.
    fn make_room(&mut self, n: usize) -> Result<()> {
        if n > self.max {
            return Err(Error::BufferFull { limit: self.max });
        }

        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.pos = 0;
        }
        if n > self.buf.len() {
            let size = n.max(self.buf.len() * 2).min(self.max);
            self.buf.resize(size, 0);
        }

        Ok(())
    }
}

impl<R: AsyncRead + Unpin + Send> PeekRead for PeekReader<R> {
    async fn peek(&mut self, n: usize) -> Result<&[u8]> {
        if self.available() < n {
            self.make_room(n)?;

            while self.available() < n {
                let read = self.inner.read(&mut self.buf[self.end..]).await?;
                if read == 0 {
                    break;
                }
                self.end += read;
            }
        }

        Ok(&self.buf[self.pos..self.end])
    }

    #[inline]
    fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..self.end]
    }

    #[inline]
    fn discard(&mut self, n: usize) -> io::Result<()> {
        if n > self.available() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "discarding more than is buffered",
            ));
        }

        self.pos += n;
        if self.pos == self.end {
            self.pos = 0;
            self.end = 0;
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.available() == 0 {
            // Large reads bypass the buffer entirely.
            if buf.len() >= self.buf.len() {
                return self.inner.read(buf).await;
            }

            self.pos = 0;
            self.end = self.inner.read(&mut self.buf).await?;
        }

        let n = buf.len().min(self.available());
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.discard(n)?;
        Ok(n)
    }
}
