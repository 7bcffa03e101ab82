//! h1_relay - Low-allocation HTTP/1.x request reader for forwarding proxies
//!
//! Reads request heads and frames their bodies off any async byte stream,
//! without ever owning the stream. Built for proxies that inspect a request,
//! maybe rewrite a header or two, and pass everything on byte for byte.
//!
//! # Features
//!
//! - **Request heads** - request line and headers in one buffer per request,
//!   canonicalized keys, case-insensitive lookup, in-place `set`/`del`
//! - **Body framing** - `Content-Length`, `Transfer-Encoding: chunked` (validated
//!   and passed through unchanged) and read-until-close
//! - **Routing helpers** - [`Request::host_port`] for `CONNECT`, absolute and
//!   origin-form targets, [`is_web_request`] to tell proxy traffic apart
//! - **Connection replay** - [`restore_conn`] hands a partly read connection
//!   to another consumer as if it had never been touched
//! - **Object pooling** - [`pool::requests`] keeps parsed requests warm, so a
//!   steady stream of requests parses without allocating
//!
//! # Examples
//!
//! A tiny forwarder, in outline:
//! ```no_run
//! use h1_relay::{read_request, PeekReader};
//! use tokio::net::{TcpListener, TcpStream};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> h1_relay::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         tokio::spawn(async move {
//!             let mut src = PeekReader::new(stream);
//!
//!             while let Some(mut req) = read_request(&mut src).await? {
//!                 let target = req.host_port()?.to_string();
//!                 let mut upstream = TcpStream::connect(target).await?;
//!                 req.header_mut().del(b"Proxy-Connection");
//!                 req.write_to(&mut src, &mut upstream).await?;
//!             }
//!             h1_relay::Result::<(), h1_relay::Error>::Ok(())
//!         });
//!     }
//! }
//! ```
//!
//! Handing a connection over after peeking at its first request:
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> h1_relay::Result<()> {
//! use h1_relay::{is_web_request, restore_conn, PeekReader, Request};
//!
//! let raw = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
//! let mut src = PeekReader::new(&raw[..]);
//!
//! let mut req = Request::new();
//! req.read(&mut src).await?;
//!
//! if is_web_request(&req) {
//!     let conn = restore_conn(src, Some(req.header()));
//!     assert_eq!(conn.pending(), raw);
//! }
//! # Ok(())
//! # }
//! ```

pub(crate) mod http {
    pub(crate) mod body;
    pub(crate) mod header;
    pub(crate) mod request;
    pub(crate) mod types;
}
pub(crate) mod conn {
    pub(crate) mod restore;
    pub(crate) mod scanner;
}
pub(crate) mod errors;
pub mod limits;
pub mod pool;

pub use crate::{
    conn::{
        restore::{restore_conn, RestoredConn},
        scanner::{PeekRead, PeekReader},
    },
    errors::{Error, Result, WriteError},
    http::{
        body::{Body, ChunkedDecoder},
        header::{split_header_line, RequestHeader},
        request::{is_web_request, read_request, BodyReader, HostPort, Request},
    },
};
