//! Error types produced while bridging a milter session to the scanner.

use std::error::Error as StdError;

use thiserror::Error;

use miltr_common::ProtocolError;

/// Everything that can go wrong while running a bridged milter session.
///
/// This is the [`miltr_server::Milter::Error`] associated type for
/// [`Session`](crate::session::Session); `miltr-server` wraps it in its own
/// `Error<E>` before it reaches the connection loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A malformed milter frame reached a handler that parses it further,
    /// e.g. a `CONNECT` address that won't parse as a socket address.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The scanner replied, but its body wasn't a verdict this crate
    /// understands.
    #[error("failed to decode scanner verdict: {0}")]
    Verdict(#[from] serde_json::Error),

    /// The configured [`ScanTransport`](crate::scanner::ScanTransport)
    /// failed to deliver the request or get a response.
    #[error("scanner transport error: {0}")]
    Scanner(#[source] Box<dyn StdError + Send + Sync>),

    /// A macro or envelope value couldn't be turned into an HTTP header
    /// (e.g. it contained a control character).
    #[error("failed to build scanner request: {0}")]
    Request(#[from] http::Error),
}
