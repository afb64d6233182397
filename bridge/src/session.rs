//! Per-connection state: the milter `Session State` component.
//!
//! A [`Session`] accumulates everything a single SMTP transaction tells the
//! milter client (envelope, headers, body) and, at `end_of_body`, renders it
//! into a scan request, applies the returned verdict and answers with the
//! resulting [`ModificationResponse`].

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;

use miltr_common::{
    actions::{Action, Continue},
    commands::{Body, Connect, Family, Header, Helo, Macro, Mail, Recipient},
    modifications::ModificationResponse,
};
use miltr_server::Milter;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::context::BridgeContext;
use crate::error::BridgeError;
use crate::http_adapter;
use crate::scanner::ScanTransport;
use crate::verdict;

/// A key into [`Session`]'s header/macro maps that folds case, matching how
/// SMTP header names and milter macro names are compared case-insensitively.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct CiKey(String);

impl CiKey {
    pub(crate) fn new(s: &str) -> Self {
        Self(s.to_ascii_lowercase())
    }
}

/// The peer address reported by `CONNECT`, normalized to a type that renders
/// the way the scanner's `IP` header expects (`host:port`, IPv6 bracketed).
#[derive(Clone, Debug, PartialEq)]
pub enum PeerAddr {
    /// A TCP/IP peer (`Family::Inet` or `Family::Inet6`).
    Inet(SocketAddr),
    /// A unix domain socket peer (`Family::Unix`), identified by path.
    Unix(String),
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "{path}"),
        }
    }
}

/// Parse the peer address out of a `CONNECT` command.
///
/// Sendmail sends IPv6 literals prefixed with `IPv6:`; that prefix is
/// stripped and the address is bracketed before being parsed together with
/// the port, matching how `std::net::SocketAddr` expects a `[addr]:port`
/// literal. An unrecognized family, or an address that doesn't parse,
/// yields `None` rather than a protocol error -- a connection is still
/// usable without a peer address.
fn parse_peer_addr(connect: &Connect) -> Option<PeerAddr> {
    match connect.family {
        Family::Unknown => None,
        Family::Unix => Some(PeerAddr::Unix(connect.address().into_owned())),
        Family::Inet => {
            let port = connect.port.unwrap_or(0);
            format!("{}:{port}", connect.address())
                .parse::<SocketAddr>()
                .ok()
                .map(PeerAddr::Inet)
        }
        Family::Inet6 => {
            let port = connect.port.unwrap_or(0);
            let raw = connect.address();
            let stripped = raw
                .strip_prefix("IPv6:")
                .or_else(|| raw.strip_prefix("ipv6:"))
                .unwrap_or(&raw);
            let bracketed = if stripped.starts_with('[') {
                stripped.to_string()
            } else {
                format!("[{stripped}]")
            };
            format!("{bracketed}:{port}")
                .parse::<SocketAddr>()
                .ok()
                .map(PeerAddr::Inet)
        }
    }
}

/// State accumulated over one milter connection and handed to a
/// [`ScanTransport`] at `end_of_body`.
///
/// Fields are `pub(crate)` so [`http_adapter`](crate::http_adapter) and
/// [`verdict`](crate::verdict) can read them directly; nothing outside this
/// crate is meant to poke at a session mid-transaction.
pub struct Session<T> {
    pub(crate) context: Arc<BridgeContext>,
    transport: T,

    pub(crate) peer_addr: Option<PeerAddr>,
    pub(crate) hostname: String,
    pub(crate) helo: String,
    pub(crate) from: Option<String>,
    pub(crate) rcpts: Vec<String>,
    pub(crate) message: BytesMut,
    pub(crate) headers_seen: HashMap<CiKey, u32>,
    pub(crate) macros: HashMap<CiKey, String>,

    pub(crate) discard_on_reject: bool,
    pub(crate) no_action: bool,
}

impl<T> Session<T> {
    /// Build a fresh session sharing `context` and using `transport` to
    /// reach the scanner.
    pub fn new(context: Arc<BridgeContext>, transport: T) -> Self {
        let discard_on_reject = context.default_discard_on_reject();
        Self {
            context,
            transport,
            peer_addr: None,
            hostname: String::new(),
            helo: String::new(),
            from: None,
            rcpts: Vec::new(),
            message: BytesMut::new(),
            headers_seen: HashMap::new(),
            macros: HashMap::new(),
            discard_on_reject,
            no_action: false,
        }
    }

    /// Reset the per-message state (the `ABORT` reset scope): everything
    /// gathered since `CONNECT`, except negotiated macros.
    fn reset_message(&mut self) {
        self.hostname.clear();
        self.helo.clear();
        self.from = None;
        self.rcpts.clear();
        self.message.clear();
        self.headers_seen.clear();
        self.discard_on_reject = self.context.default_discard_on_reject();
        self.no_action = false;
    }

    /// Reset everything a `QUIT_NC` hands back for reuse (the `QUIT_NC` reset
    /// scope): the `ABORT` reset plus `peer_addr` and negotiated macros, so
    /// the next `CONNECT` on this same wire connection starts from a clean
    /// envelope.
    fn reset_connection(&mut self) {
        self.reset_message();
        self.peer_addr = None;
        self.macros.clear();
    }
}

#[async_trait]
impl<T: ScanTransport + Send> Milter for Session<T> {
    type Error = BridgeError;

    async fn macro_(&mut self, macro_: Macro) -> Result<(), Self::Error> {
        for (name, value) in macro_.macros() {
            let name = String::from_utf8_lossy(name);
            let value = String::from_utf8_lossy(value).into_owned();

            if name.eq_ignore_ascii_case("{mail_host}") {
                self.hostname = value.clone();
            }

            self.macros.insert(CiKey::new(&name), value);
        }
        Ok(())
    }

    async fn connect(&mut self, connect_info: Connect) -> Result<Action, Self::Error> {
        self.hostname = connect_info.hostname().into_owned();
        self.peer_addr = parse_peer_addr(&connect_info);
        Ok(Continue.into())
    }

    async fn helo(&mut self, helo: Helo) -> Result<Action, Self::Error> {
        self.helo = helo.helo().into_owned();
        Ok(Continue.into())
    }

    async fn mail(&mut self, mail: Mail) -> Result<Action, Self::Error> {
        self.from = Some(mail.sender().into_owned());
        Ok(Continue.into())
    }

    async fn rcpt(&mut self, recipient: Recipient) -> Result<Action, Self::Error> {
        self.rcpts.push(recipient.recipient().into_owned());
        Ok(Continue.into())
    }

    async fn header(&mut self, header: Header) -> Result<Action, Self::Error> {
        let name = header.name();
        *self.headers_seen.entry(CiKey::new(&name)).or_insert(0) += 1;

        self.message.extend_from_slice(name.as_bytes());
        self.message.extend_from_slice(b": ");
        self.message.extend_from_slice(header.value().as_bytes());
        self.message.extend_from_slice(b"\r\n");

        Ok(Continue.into())
    }

    async fn end_of_header(&mut self) -> Result<Action, Self::Error> {
        self.message.extend_from_slice(b"\r\n");
        Ok(Continue.into())
    }

    async fn body(&mut self, body: Body) -> Result<Action, Self::Error> {
        self.message.extend_from_slice(body.as_bytes());
        Ok(Continue.into())
    }

    #[cfg_attr(feature = "tracing", instrument(skip_all))]
    async fn end_of_body(&mut self) -> Result<ModificationResponse, Self::Error> {
        let request = http_adapter::render(self)?;

        let verdict = self
            .transport
            .scan(request)
            .await
            .map_err(|err| BridgeError::Scanner(Box::new(err)))?;

        let response = verdict::apply(self, &verdict);
        self.reset_message();
        Ok(response)
    }

    async fn abort(&mut self) -> Result<Action, Self::Error> {
        self.reset_message();
        Ok(Continue.into())
    }

    async fn quit_nc(&mut self) -> Result<(), Self::Error> {
        self.reset_connection();
        Ok(())
    }
}
