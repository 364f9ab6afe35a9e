//! Client configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::rustls;

use crate::protocol::PROTOCOL_1_2;

/// Library version advertised by default
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Agent name advertised by default; concatenated with the client version
const DEFAULT_AGENT: &str = "electrum-rpc";

/// Available configuration options for a client session.
///
/// All fields besides `address` have working defaults; see [`Options::new`].
#[derive(Clone)]
pub struct Options {
    /// Address of the server, as `host:port`
    pub address: String,

    /// Version string advertised by the client instance
    pub version: String,

    /// Protocol version preferred by the client instance
    pub protocol: String,

    /// Agent identifier transmitted to the server where required;
    /// concatenated with the client version
    pub agent: String,

    /// When set, dispatch a lightweight `server.version` call at
    /// `keep_alive_interval` to prevent idle-timeout disconnects
    pub keep_alive: bool,

    /// When provided, the TCP stream is upgraded to TLS with this
    /// caller-supplied trust configuration
    pub tls: Option<Arc<rustls::ClientConfig>>,

    /// Interval between redial attempts after a lost connection (default 5s)
    pub reconnect_interval: Duration,

    /// Interval between end-to-end probes while waiting for a reconnected
    /// link to become responsive before resuming subscriptions (default 2s)
    pub resume_poll_interval: Duration,

    /// Interval between keep-alive calls (default 60s)
    pub keep_alive_interval: Duration,
}

impl Options {
    /// Options for `address` with the documented defaults: protocol 1.2,
    /// library agent/version strings, keep-alive off, plain TCP.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            version: VERSION.to_string(),
            protocol: PROTOCOL_1_2.to_string(),
            agent: DEFAULT_AGENT.to_string(),
            keep_alive: false,
            tls: None,
            reconnect_interval: Duration::from_secs(5),
            resume_poll_interval: Duration::from_secs(2),
            keep_alive_interval: Duration::from_secs(60),
        }
    }

    /// Agent string sent to the server: `"{agent}-{version}"`.
    #[must_use]
    pub fn agent_id(&self) -> String {
        format!("{}-{}", self.agent, self.version)
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("protocol", &self.protocol)
            .field("agent", &self.agent)
            .field("keep_alive", &self.keep_alive)
            .field("tls", &self.tls.is_some())
            .field("reconnect_interval", &self.reconnect_interval)
            .field("resume_poll_interval", &self.resume_poll_interval)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .finish()
    }
}
