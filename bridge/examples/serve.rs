//! The process entry point: binds `BridgeConfig::bind_address`, accepts
//! milter connections and drives each one through a [`Session`] using
//! `max_frame_size`/`session_timeout` from the loaded config.
//!
//! Reaching an actual scanning backend is this crate's explicit seam
//! ([`ScanTransport`]); this example stands in a stub that always waves
//! messages through, since shipping an HTTP client is outside this crate's
//! scope. A real deployment supplies its own transport here.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use http::Request;
use miette::{IntoDiagnostic, Result};
use tokio::net::TcpListener;
use tokio_util::compat::TokioAsyncReadCompatExt;

use miltr_bridge::{BridgeConfig, BridgeContext, ScanTransport, Session, Verdict};
use miltr_server::Server;

struct AcceptEverything;

#[derive(Debug, thiserror::Error)]
#[error("stub transport never fails")]
struct Never;

#[async_trait]
impl ScanTransport for AcceptEverything {
    type Error = Never;

    async fn scan(&self, _request: Request<Vec<u8>>) -> Result<Verdict, Self::Error> {
        Ok(Verdict {
            action: Some("greylist".to_string()),
            ..Verdict::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = BridgeConfig {
        bind_address: env::var("BRIDGE_LISTEN_ADDR")
            .unwrap_or_else(|_| BridgeConfig::default().bind_address),
        ..BridgeConfig::default()
    };
    let context = Arc::new(BridgeContext::new(&config));

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .into_diagnostic()?;
    println!("listening on {}", config.bind_address);

    loop {
        let (stream, peer) = listener.accept().await.into_diagnostic()?;
        let context = Arc::clone(&context);
        let timeout = config.session_timeout;
        let max_frame_size = config.max_frame_size;

        tokio::spawn(async move {
            let mut session = Session::new(context, AcceptEverything);
            let mut server = Server::new(&mut session, true, max_frame_size);

            match tokio::time::timeout(timeout, server.handle_connection(stream.compat())).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => eprintln!("connection from {peer} failed: {err}"),
                Err(_) => eprintln!("connection from {peer} timed out after {timeout:?}"),
            }
        });
    }
}
