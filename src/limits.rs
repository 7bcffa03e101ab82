//! Buffer sizes and pool capacities
//!
//! # Memory Consumption
//!
//! Each live connection holds one [`PeekReader`](crate::PeekReader) buffer,
//! bounded by [`BufLimits::max_buffer_size`]. Each pooled
//! [`Request`](crate::Request) holds the buffers described by [`ReqLimits`],
//! which keep their capacity between requests.
//!
//! # Examples
//!
//! ```
//! use h1_relay::{limits::{BufLimits, ReqLimits}, PeekReader, Request};
//!
//! let reader = PeekReader::with_limits(&b""[..], BufLimits {
//!     max_buffer_size: 16 * 1024, // Reject header sections above 16 KB
//!     ..BufLimits::default()
//! });
//!
//! let request = Request::with_limits(&ReqLimits {
//!     header_lines: 16, // Proxies usually see more headers than servers
//!     ..ReqLimits::default()
//! });
//! # let _ = (reader, request);
//! ```

/// Sizing of the [`PeekReader`](crate::PeekReader) buffer.
///
/// The buffer starts at `buffer_size` and doubles on demand while a peek needs
/// more bytes than it can hold, up to `max_buffer_size`. A request head that
/// does not fit fails with [`Error::BufferFull`](crate::Error::BufferFull).
#[derive(Debug, Clone)]
pub struct BufLimits {
    /// Initial buffer size in bytes (default: `4 KB`)
    ///
    /// Also the read size used to refill the buffer. Enough for the head of
    /// most browser requests in a single syscall.
    pub buffer_size: usize,
    /// Hard upper bound for the buffer in bytes (default: `64 KB`)
    ///
    /// Bounds the size of a request line or header section. Protects against
    /// peers that never send the terminating `CRLFCRLF`.
    pub max_buffer_size: usize,
}

impl Default for BufLimits {
    fn default() -> Self {
        Self {
            buffer_size: 4 * 1024,
            max_buffer_size: 64 * 1024,
        }
    }
}

/// Initial capacities of a [`RequestHeader`](crate::RequestHeader).
///
/// The buffers grow when a request needs more and keep their capacity across
/// [`reset`](crate::RequestHeader::reset), so after warm-up a pooled request
/// parses without touching the allocator.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Method buffer (default: `8 B`, fits `OPTIONS`)
    pub method_capacity: usize,
    /// Request target buffer (default: `16 B`)
    pub uri_capacity: usize,
    /// Protocol buffer (default: `8 B`, fits `HTTP/1.1`)
    pub proto_capacity: usize,
    /// Number of header line slots (default: `5`)
    pub header_lines: usize,
    /// Header section bytes (default: `512 B`)
    pub header_bytes: usize,
    /// Largest header section capacity kept on reset (default: `16 KB`)
    ///
    /// A request with an unusually large head would otherwise pin that
    /// memory in the pool forever. Above this, the buffer is reallocated
    /// back to `header_bytes`.
    pub max_header_bytes: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            method_capacity: 8,
            uri_capacity: 16,
            proto_capacity: 8,
            header_lines: 5,    // Host, User-Agent, Accept, Connection, +1
            header_bytes: 512,
            max_header_bytes: 16 * 1024,
        }
    }
}

/// Capacity of the process-wide object pools.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    /// Idle requests retained by [`requests`](crate::pool::requests) (default: `1024`)
    ///
    /// Requests released while the pool is full are dropped.
    pub requests: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self { requests: 1024 }
    }
}
