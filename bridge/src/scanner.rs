//! The seam between a bridged milter session and the mail-scanning backend.
//!
//! This crate renders requests and applies verdicts; it does not ship a
//! transport. An embedder wires up a concrete [`ScanTransport`] (an HTTP
//! client, a mock for tests, ...) to actually reach the scanner.

use async_trait::async_trait;
use http::Request;

use crate::verdict::Verdict;

/// Deliver a rendered scan request to the mail-scanning backend and parse
/// its answer into a [`Verdict`].
///
/// Implementations own connection pooling, retries and timeouts; this crate
/// only calls `scan` once per `end_of_body` and propagates whatever it
/// returns.
#[async_trait]
pub trait ScanTransport: Send + Sync {
    /// The error a transport failure surfaces as.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send `request` to the scanner and return its verdict.
    async fn scan(&self, request: Request<Vec<u8>>) -> Result<Verdict, Self::Error>;
}
