//! Process-wide configuration, set once at startup and read-only after that.

use std::time::Duration;

/// Startup configuration for a bridge deployment.
///
/// Loading this from environment, a file or CLI flags is outside this
/// crate's scope; constructing it is not. [`Default`] matches the wire
/// constants this crate otherwise hard-codes.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Header name used to mark messages under the `add_header` verdict
    /// action. Defaults to `X-Spam`.
    pub spam_header: String,
    /// Whether a `reject` verdict should `DISCARD` instead of
    /// `REPLYCODE`+`REJECT` by default, before any per-message `milter.reject`
    /// directive overrides it.
    pub discard_on_reject: bool,
    /// Address the milter listener binds to.
    pub bind_address: String,
    /// Per-connection idle timeout.
    pub session_timeout: Duration,
    /// Largest payload a single milter frame may declare before it is
    /// rejected as a protocol error.
    pub max_frame_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            spam_header: "X-Spam".to_string(),
            discard_on_reject: false,
            bind_address: "127.0.0.1:8890".to_string(),
            session_timeout: Duration::from_secs(30),
            max_frame_size: 2_usize.pow(16),
        }
    }
}

/// The process-wide, immutable context threaded into every accepted
/// connection.
///
/// Built once from a [`BridgeConfig`] at library init and then shared,
/// read-only, across every [`Session`](crate::session::Session).
#[derive(Debug, Clone)]
pub struct BridgeContext {
    spam_header: String,
    default_discard_on_reject: bool,
}

impl BridgeContext {
    /// Build a context from a loaded configuration.
    #[must_use]
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            spam_header: config.spam_header.clone(),
            default_discard_on_reject: config.discard_on_reject,
        }
    }

    /// The configured spam header name, e.g. `X-Spam`.
    #[must_use]
    pub fn spam_header(&self) -> &str {
        &self.spam_header
    }

    /// Whether new sessions start with `discard_on_reject` set.
    #[must_use]
    pub fn default_discard_on_reject(&self) -> bool {
        self.default_discard_on_reject
    }
}

impl Default for BridgeContext {
    fn default() -> Self {
        Self::new(&BridgeConfig::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_context_from_config() {
        let config = BridgeConfig {
            spam_header: "X-Custom-Spam".to_string(),
            discard_on_reject: true,
            ..BridgeConfig::default()
        };

        let context = BridgeContext::new(&config);

        assert_eq!(context.spam_header(), "X-Custom-Spam");
        assert!(context.default_discard_on_reject());
    }
}
