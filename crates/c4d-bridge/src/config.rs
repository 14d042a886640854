//! Application link configuration

use crate::backoff::BackoffConfig;
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, Framing};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// What `send` does while the link is reconnecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Reject with `NotConnected`
    #[default]
    FailFast,
    /// Wait for the connection, up to `max_pending` waiters; the rest get `Busy`
    Queue { max_pending: usize },
}

/// Configuration for the Cinema 4D socket connection
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Host to connect to (default: 127.0.0.1)
    pub host: String,
    /// Plugin socket port (default: 5555)
    pub port: u16,
    pub framing: Framing,
    pub max_frame_size: usize,
    /// Bound on a single connection attempt
    pub connect_timeout: Duration,
    pub admission: AdmissionPolicy,
    pub backoff: BackoffConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5555,
            framing: Framing::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Duration::from_secs(5),
            admission: AdmissionPolicy::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Read overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`, falling back to defaults
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = lookup("C4D_HOST").filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = parse_var(&lookup, "C4D_PORT") {
            config.port = port;
        }
        if let Some(framing) = parse_var(&lookup, "C4D_FRAMING") {
            config.framing = framing;
        }
        if let Some(timeout) = parse_secs(&lookup, "C4D_CONNECT_TIMEOUT_SECS", 0.1) {
            config.connect_timeout = timeout;
        }
        if let Some(max_pending) = parse_var::<usize>(&lookup, "C4D_QUEUE_WHILE_DISCONNECTED") {
            config.admission = if max_pending == 0 {
                AdmissionPolicy::FailFast
            } else {
                AdmissionPolicy::Queue { max_pending }
            };
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, "C4D_RECONNECT_ATTEMPTS") {
            config.backoff.max_attempts = (attempts > 0).then_some(attempts);
        }

        config
    }

    /// `host:port` of the plugin socket
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse an optional variable, warning on garbage
pub fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}

/// Parse a duration given in (fractional) seconds, floored at `min_secs`
///
/// Values a `Duration` cannot hold (`inf`, `1e30`) are logged and ignored.
pub fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    min_secs: f64,
) -> Option<Duration> {
    let secs = parse_var::<f64>(lookup, key)?;
    match Duration::try_from_secs_f64(secs.max(min_secs)) {
        Ok(duration) => Some(duration),
        Err(e) => {
            warn!("Ignoring {}={}: {}", key, secs, e);
            None
        }
    }
}
