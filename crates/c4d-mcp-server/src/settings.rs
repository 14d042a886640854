//! HTTP and SSE listener settings

use c4d_bridge::config::{parse_secs, parse_var};
use std::net::SocketAddr;
use std::time::Duration;

/// Where the HTTP-based transports listen and how they answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
    /// SSE stream endpoint (GET)
    pub sse_path: String,
    /// SSE message endpoint (POST)
    pub message_path: String,
    /// Streamable HTTP endpoint
    pub streamable_http_path: String,
    /// Answer streamable HTTP posts with plain JSON instead of an event stream
    pub json_response: bool,
    /// Every streamable HTTP post is its own session
    pub stateless_http: bool,
    /// Stateful HTTP sessions unused for this long are dropped
    pub session_idle_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            sse_path: "/sse".into(),
            message_path: "/messages/".into(),
            streamable_http_path: "/mcp".into(),
            json_response: false,
            stateless_http: false,
            session_idle_timeout: Duration::from_secs(3600),
        }
    }
}

impl HttpSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(host) = lookup("C4D_MCP_HOST").filter(|h| !h.trim().is_empty()) {
            settings.host = host.trim().to_string();
        }
        if let Some(port) = parse_var(&lookup, "C4D_MCP_PORT") {
            settings.port = port;
        }
        if let Some(path) = lookup("C4D_MCP_SSE_PATH") {
            settings.sse_path = normalize_path(&path);
        }
        if let Some(path) = lookup("C4D_MCP_MESSAGE_PATH") {
            settings.message_path = normalize_path(&path);
        }
        if let Some(path) = lookup("C4D_MCP_HTTP_PATH") {
            settings.streamable_http_path = normalize_path(&path);
        }
        if let Some(flag) = lookup("C4D_MCP_JSON_RESPONSE") {
            settings.json_response = parse_flag(&flag);
        }
        if let Some(flag) = lookup("C4D_MCP_STATELESS_HTTP") {
            settings.stateless_http = parse_flag(&flag);
        }
        if let Some(idle) = parse_secs(&lookup, "C4D_MCP_SESSION_IDLE_SECS", 1.0) {
            settings.session_idle_timeout = idle;
        }

        settings
    }

    /// `host:port` to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn sse_url(&self) -> String {
        format!("{}{}", self.base_url(), self.sse_path)
    }

    pub fn message_url(&self) -> String {
        format!("{}{}", self.base_url(), self.message_path)
    }

    pub fn streamable_http_url(&self) -> String {
        format!("{}{}", self.base_url(), self.streamable_http_path)
    }

    /// Same settings, reporting URLs for the address actually bound
    pub fn with_bound_address(&self, addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..self.clone()
        }
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> HttpSettings {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HttpSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = from(&[]);
        assert_eq!(settings, HttpSettings::default());
        assert_eq!(settings.sse_url(), "http://127.0.0.1:8000/sse");
        assert_eq!(settings.message_url(), "http://127.0.0.1:8000/messages/");
        assert_eq!(settings.streamable_http_url(), "http://127.0.0.1:8000/mcp");
    }

    #[test]
    fn test_overrides() {
        let settings = from(&[
            ("C4D_MCP_HOST", "0.0.0.0"),
            ("C4D_MCP_PORT", "9100"),
            ("C4D_MCP_HTTP_PATH", "rpc"),
            ("C4D_MCP_JSON_RESPONSE", "TRUE"),
            ("C4D_MCP_STATELESS_HTTP", "0"),
            ("C4D_MCP_SESSION_IDLE_SECS", "600"),
        ]);
        assert_eq!(settings.bind_address(), "0.0.0.0:9100");
        assert_eq!(settings.streamable_http_path, "/rpc");
        assert!(settings.json_response);
        assert!(!settings.stateless_http);
        assert_eq!(settings.session_idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_idle_timeout_out_of_range_keeps_default() {
        for raw in ["inf", "1e30"] {
            let settings = from(&[("C4D_MCP_SESSION_IDLE_SECS", raw)]);
            assert_eq!(settings.session_idle_timeout, Duration::from_secs(3600));
        }
        let settings = from(&[("C4D_MCP_SESSION_IDLE_SECS", "0")]);
        assert_eq!(settings.session_idle_timeout, Duration::from_secs(1));
    }
}
