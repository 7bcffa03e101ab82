use std::io;
use thiserror::Error;

/// Result type used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while reading a request head or its body.
///
/// Every protocol error is terminal for the request that produced it: nothing
/// is retried internally and the caller decides what happens to the connection.
#[derive(Debug, Error)]
pub enum Error {
    /// The request line could not be split into method, URI and protocol.
    #[error("invalid request line: {0}")]
    InvalidRequestLine(&'static str),
    /// The stream ended in the middle of a message.
    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    /// A chunk-size line did not start with a hex digit.
    #[error("invalid chunk header length")]
    InvalidChunkHeaderLength,
    /// A chunk-size line contained a byte that is neither hex, `;` nor CRLF.
    #[error("invalid chunk header")]
    InvalidChunkHeader,
    /// A chunk size had more than 16 hex digits.
    #[error("chunk length too large")]
    ChunkLengthTooLarge,
    /// Chunk data was not followed by CRLF.
    #[error("invalid chunk ending")]
    InvalidChunkEnding,

    /// Neither the request target nor the `Host` header names an authority.
    #[error("missing host")]
    MissingHost,
    /// The authority is not valid UTF-8.
    #[error("invalid host")]
    InvalidHost,
    /// The authority carries a port that is not a decimal `u16`.
    #[error("invalid port")]
    InvalidPort,

    /// Peeking would need more than `limit` buffered bytes.
    #[error("read buffer full ({limit} bytes)")]
    BufferFull { limit: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` for malformed input, `false` for transport failures.
    ///
    /// A proxy usually answers protocol errors with `400 Bad Request` and
    /// silently drops the socket on I/O errors.
    #[inline]
    pub fn is_protocol(&self) -> bool {
        !matches!(self, Error::Io(_))
    }
}

/// Failure of [`Request::write_to`](crate::Request::write_to), with the
/// number of bytes that reached the sink before it.
///
/// A proxy can still answer `400 Bad Request` while `written` is zero.
#[derive(Debug, Error)]
#[error("{source} (after {written} bytes written)")]
pub struct WriteError {
    pub written: u64,
    pub source: Error,
}

impl From<WriteError> for Error {
    #[inline]
    fn from(err: WriteError) -> Self {
        err.source
    }
}

// Copyable mirror of the decoder errors, so a failed decoder can keep
// returning the same error on every later read. Transport errors keep only
// their kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    Truncated,
    HeaderLength,
    Header,
    TooLarge,
    Ending,
    Overflow(usize),
    Transport(io::ErrorKind),
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Truncated => Error::UnexpectedEndOfStream,
            Fault::HeaderLength => Error::InvalidChunkHeaderLength,
            Fault::Header => Error::InvalidChunkHeader,
            Fault::TooLarge => Error::ChunkLengthTooLarge,
            Fault::Ending => Error::InvalidChunkEnding,
            Fault::Overflow(limit) => Error::BufferFull { limit },
            Fault::Transport(kind) => Error::Io(kind.into()),
        }
    }
}

impl From<&Error> for Fault {
    fn from(err: &Error) -> Self {
        match err {
            Error::UnexpectedEndOfStream => Fault::Truncated,
            Error::InvalidChunkHeaderLength => Fault::HeaderLength,
            Error::InvalidChunkHeader => Fault::Header,
            Error::ChunkLengthTooLarge => Fault::TooLarge,
            Error::InvalidChunkEnding => Fault::Ending,
            Error::BufferFull { limit } => Fault::Overflow(*limit),
            Error::Io(err) => Fault::Transport(err.kind()),
            // Not produced while decoding a body.
            Error::InvalidRequestLine(_)
            | Error::MissingHost
            | Error::InvalidHost
            | Error::InvalidPort => Fault::Transport(io::ErrorKind::InvalidData),
        }
    }
}
