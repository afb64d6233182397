//! Render a [`Session`] as the HTTP request the scanner expects.
//!
//! The milter side speaks in commands and macros; the scanner speaks HTTP.
//! This module is the one-way translation between them: envelope fields
//! become headers, and the well-known Sendmail/Postfix macros are folded
//! into a handful of scanner-specific headers.

use http::{Method, Request};

use crate::error::BridgeError;
use crate::scanner::ScanTransport;
use crate::session::{CiKey, Session};

const PATH: &str = "/checkv2";

/// Render `session` into a scan request, moving its accumulated message
/// buffer out (leaving it empty) as the request body.
pub(crate) fn render<T: ScanTransport>(
    session: &mut Session<T>,
) -> Result<Request<Vec<u8>>, BridgeError> {
    let body = std::mem::take(&mut session.message).to_vec();

    let mut builder = Request::builder().method(Method::POST).uri(PATH);
    builder = builder.header("Milter", "Yes");

    if let Some(from) = &session.from {
        builder = builder.header("From", from.as_str());
    }
    for rcpt in &session.rcpts {
        builder = builder.header("Rcpt", rcpt.as_str());
    }
    if !session.helo.is_empty() {
        builder = builder.header("Helo", session.helo.as_str());
    }
    if let Some(peer) = &session.peer_addr {
        builder = builder.header("IP", peer.to_string());
    }

    if let Some(queue_id) = macro_lookup(session, &["{i}", "i"]) {
        builder = builder.header("Queue-Id", queue_id);
    }

    let daemon_name = macro_lookup(session, &["{daemon_name}"]);
    if let Some(daemon_name) = &daemon_name {
        builder = builder.header("MTA-Tag", daemon_name.as_str());
        builder = builder.header("MTA-Name", daemon_name.as_str());
    }

    if let Some(user_agent) = macro_lookup(session, &["{v}", "v"]) {
        builder = builder.header("User-Agent", user_agent);
    }
    if let Some(cipher) = macro_lookup(session, &["{cipher}"]) {
        builder = builder.header("TLS-Cipher", cipher);
    }
    if let Some(tls_version) = macro_lookup(session, &["{tls_version}"]) {
        builder = builder.header("TLS-Version", tls_version);
    }
    if let Some(auth_authen) = macro_lookup(session, &["{auth_authen}"]) {
        builder = builder.header("User", auth_authen);
    }
    if session.hostname.is_empty() {
        if let Some(client_name) = macro_lookup(session, &["{client_name}"]) {
            builder = builder.header("Hostname", client_name);
        }
    }
    if daemon_name.is_none() {
        if let Some(j) = macro_lookup(session, &["{j}", "j"]) {
            builder = builder.header("MTA-Name", j);
        }
    }

    builder.body(body).map_err(BridgeError::from)
}

/// Look up the first macro name in `names` that has a value, matching how
/// `{name}` and bare `name` forms are both sent depending on negotiated
/// macro stage.
fn macro_lookup<T: ScanTransport>(session: &Session<T>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| session.macros.get(&CiKey::new(name)).cloned())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::context::{BridgeConfig, BridgeContext};
    use crate::session::PeerAddr;
    use crate::verdict::Verdict;

    use super::*;

    struct NoopTransport;

    #[derive(Debug, thiserror::Error)]
    #[error("noop")]
    struct NoopError;

    #[async_trait]
    impl ScanTransport for NoopTransport {
        type Error = NoopError;

        async fn scan(&self, _request: Request<Vec<u8>>) -> Result<Verdict, Self::Error> {
            Err(NoopError)
        }
    }

    fn session() -> Session<NoopTransport> {
        let context = std::sync::Arc::new(BridgeContext::new(&BridgeConfig::default()));
        Session::new(context, NoopTransport)
    }

    #[test]
    fn renders_method_and_path() {
        let mut session = session();
        let request = render(&mut session).expect("renders");
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), PATH);
    }

    #[test]
    fn moves_message_body_out_of_session() {
        let mut session = session();
        session.message.extend_from_slice(b"Subject: hi\r\n\r\nbody");

        let request = render(&mut session).expect("renders");

        assert_eq!(request.body(), b"Subject: hi\r\n\r\nbody");
        assert!(session.message.is_empty());
    }

    #[test]
    fn envelope_and_ip_headers_are_set() {
        let mut session = session();
        session.from = Some("a@example.com".to_string());
        session.rcpts.push("b@example.com".to_string());
        session.helo = "mail.example.com".to_string();
        session.peer_addr = Some(PeerAddr::Inet("192.0.2.1:25".parse().unwrap()));

        let request = render(&mut session).expect("renders");

        assert_eq!(request.headers().get("From").unwrap(), "a@example.com");
        assert_eq!(request.headers().get("Rcpt").unwrap(), "b@example.com");
        assert_eq!(request.headers().get("Helo").unwrap(), "mail.example.com");
        assert_eq!(request.headers().get("IP").unwrap(), "192.0.2.1:25");
        assert_eq!(request.headers().get("Milter").unwrap(), "Yes");
    }

    #[test]
    fn daemon_name_wins_over_j_macro() {
        let mut session = session();
        session
            .macros
            .insert(CiKey::new("{daemon_name}"), "mx1.example.com".to_string());
        session
            .macros
            .insert(CiKey::new("j"), "fallback.example.com".to_string());

        let request = render(&mut session).expect("renders");

        assert_eq!(
            request.headers().get("MTA-Name").unwrap(),
            "mx1.example.com"
        );
        assert_eq!(
            request.headers().get("MTA-Tag").unwrap(),
            "mx1.example.com"
        );
    }

    #[test]
    fn j_macro_used_as_mta_name_fallback() {
        let mut session = session();
        session
            .macros
            .insert(CiKey::new("j"), "fallback.example.com".to_string());

        let request = render(&mut session).expect("renders");

        assert_eq!(
            request.headers().get("MTA-Name").unwrap(),
            "fallback.example.com"
        );
        assert!(request.headers().get("MTA-Tag").is_none());
    }

    #[test]
    fn client_name_used_as_hostname_only_when_empty() {
        let mut session = session();
        session
            .macros
            .insert(CiKey::new("{client_name}"), "dyn-1-2-3-4.isp.example".to_string());

        let request = render(&mut session).expect("renders");
        assert_eq!(
            request.headers().get("Hostname").unwrap(),
            "dyn-1-2-3-4.isp.example"
        );

        session.hostname = "mail.example.com".to_string();
        let request = render(&mut session).expect("renders");
        assert!(request.headers().get("Hostname").is_none());
    }
}
