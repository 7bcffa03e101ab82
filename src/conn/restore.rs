use crate::{conn::scanner::PeekReader, http::header::RequestHeader};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// A connection that replays bytes already taken from it.
///
/// Reads first return the replayed bytes, then continue with the live
/// connection. Writes always go straight to the connection.
#[derive(Debug)]
pub struct RestoredConn<C> {
    replay: Vec<u8>,
    pos: usize,
    conn: C,
}

/// Rebuilds the byte stream of a connection that was partly read through a
/// [`PeekReader`].
///
/// The replay consists of the wire form of `header`, if given, followed by
/// every byte the reader had buffered but not consumed. The header is
/// re-encoded from its parsed state, so changes made to it since it was read
/// are what the next reader sees.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> h1_relay::Result<()> {
/// use h1_relay::{restore_conn, PeekReader, Request};
/// use tokio::io::AsyncReadExt;
///
/// let raw = b"GET / HTTP/1.1\r\nHost: a.com\r\n\r\n";
/// let mut src = PeekReader::new(&raw[..]);
/// let mut req = Request::new();
/// req.read(&mut src).await?;
/// req.header_mut().set(b"Host", b"b.com");
///
/// let mut conn = restore_conn(src, Some(req.header()));
/// let mut replay = String::new();
/// conn.read_to_string(&mut replay).await?;
/// assert_eq!(replay, "GET / HTTP/1.1\r\nHost: b.com\r\n\r\n");
/// # Ok(())
/// # }
/// ```
pub fn restore_conn<C>(reader: PeekReader<C>, header: Option<&RequestHeader>) -> RestoredConn<C> {
    let (conn, buffered) = reader.into_parts();

    let replay = match header {
        Some(header) => {
            let mut replay = Vec::with_capacity(header.encoded_len() + buffered.len());
            header.encode_into(&mut replay);
            replay.extend_from_slice(&buffered);
            replay
        }
        None => buffered,
    };

    debug!(replayed = replay.len(), "connection restored");
    RestoredConn {
        replay,
        pos: 0,
        conn,
    }
}

impl<C> RestoredConn<C> {
    /// Bytes still to be replayed before reads reach the connection.
    #[inline]
    pub fn pending(&self) -> &[u8] {
        &self.replay[self.pos..]
    }

    #[inline]
    pub fn get_ref(&self) -> &C {
        &self.conn
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Returns the connection, dropping any bytes not yet replayed.
    #[inline]
    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C: AsyncRead + Unpin> AsyncRead for RestoredConn<C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pos < this.replay.len() {
            let n = buf.remaining().min(this.replay.len() - this.pos);
            buf.put_slice(&this.replay[this.pos..this.pos + n]);
            this.pos += n;

            if this.pos == this.replay.len() {
                this.replay = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.conn).poll_read(cx, buf)
    }
}

impl<C: AsyncWrite + Unpin> AsyncWrite for RestoredConn<C> {
    #[inline]
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().conn).poll_write(cx, buf)
    }

    #[inline]
    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().conn).poll_write_vectored(cx, bufs)
    }

    #[inline]
    fn is_write_vectored(&self) -> bool {
        self.conn.is_write_vectored()
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().conn).poll_flush(cx)
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().conn).poll_shutdown(cx)
    }
}
