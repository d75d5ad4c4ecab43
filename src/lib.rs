//! A permissive, bidirectional HTTP/1.x parser for traffic inspection.
//!
//! The parser consumes the raw octets of both directions of a TCP
//! conversation, in arrival order, and reconstructs the transactions they
//! carry. It is built for security analyzers: malformed, ambiguous and
//! adversarial traffic is parsed as far as possible and the anomalies are
//! recorded as flags on the affected transaction instead of being
//! rejected. Consumers observe parsing through hook callbacks registered
//! on the [`config::Config`].
//!
//! ```
//! use tapir::config::Config;
//! use tapir::connection_parser::{ConnectionParser, StreamState};
//!
//! let mut cfg = Config::new();
//! cfg.hook_request_line.register(|tx| {
//!     assert_eq!(tx.request_uri.as_deref(), Some(&b"/"[..]));
//!     Ok(())
//! });
//! let mut parser = ConnectionParser::new(cfg);
//! parser.open(None, None, None, None, None);
//! let rc = parser.req_data(None, b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
//! assert_eq!(rc, StreamState::NeedMore);
//! assert_eq!(parser.conn.tx_size(), 1);
//! ```

#[macro_use]
pub mod log;

pub mod bstr;
pub mod config;
pub mod connection;
pub mod connection_parser;
pub mod content_handlers;
pub mod decompressors;
pub mod error;
pub mod hook;
pub mod multipart;
pub mod parsers;
pub mod request;
pub mod response;
pub mod table;
pub mod transaction;
pub mod unicode_bestfit_map;
pub mod uri;
pub mod utf8_decoder;
pub mod util;

/// Status codes used internally, by hooks, and as the error half of
/// [`error::Result`]. Flow-control outcomes travel the same channel as
/// hard errors so that `?` can drive the state machines.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Status {
    /// General failure; the affected direction refuses further input.
    Error,
    /// A callback had no interest in the event; processing continues.
    Declined,
    /// All supplied data was consumed; call again with more.
    NeedMore,
    /// Unconsumed input was buffered; call again with the data that
    /// follows it.
    NeedBuffer,
    /// The opposite direction has to make progress first.
    Suspend,
    /// A callback requested that parsing stop.
    Stop,
}
