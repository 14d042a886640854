//! Request router: tool calls in, Cinema 4D responses out
//!
//! The router is shared by every transport adapter and session. It never
//! retries a command: a request that may have reached Cinema 4D is reported
//! to the caller instead of being run twice.

use crate::tools;
use c4d_bridge::config::parse_secs;
use c4d_bridge::{AppLink, ApplicationResponse};
use c4d_mcp_core::{Arguments, BridgeError, Result, ToolCallRequest, ToolResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-request deadlines
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Deadline for ordinary commands
    pub request_timeout: Duration,
    /// Deadline for commands that render
    pub render_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            render_timeout: Duration::from_secs(120),
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(timeout) = parse_secs(&lookup, "C4D_REQUEST_TIMEOUT_SECS", 0.001) {
            config.request_timeout = timeout;
        }
        if let Some(timeout) = parse_secs(&lookup, "C4D_RENDER_TIMEOUT_SECS", 0.001) {
            config.render_timeout = timeout;
        }
        config
    }

    /// Deadline that applies to `command`
    pub fn deadline_for(&self, command: &str) -> Duration {
        if tools::is_render_command(command) {
            self.render_timeout
        } else {
            self.request_timeout
        }
    }
}

/// Routes tool calls onto the shared application link
#[derive(Clone)]
pub struct RequestRouter {
    link: AppLink,
    config: RouterConfig,
}

impl RequestRouter {
    pub fn new(link: AppLink, config: RouterConfig) -> Self {
        Self { link, config }
    }

    /// Run one tool call against Cinema 4D
    ///
    /// Cancelling the returned future withdraws the request; an answer that
    /// arrives afterwards is discarded by the link.
    pub async fn dispatch(&self, request: ToolCallRequest) -> Result<ToolResult> {
        let ToolCallRequest {
            id,
            name,
            arguments,
            origin,
        } = request;

        if !tools::is_known(&name) {
            return Err(BridgeError::UnknownCommand(name));
        }

        let deadline = self.config.deadline_for(&name);
        let started = Instant::now();
        debug!(%origin, id = %id, "Dispatching {} (deadline {:?})", name, deadline);

        let exchange = self.exchange(&name, arguments);
        let response = match tokio::time::timeout(deadline, exchange).await {
            Ok(response) => response,
            Err(_) => {
                warn!(%origin, id = %id, "{} timed out after {:?}", name, deadline);
                return Err(BridgeError::Timeout(deadline));
            }
        };

        let outcome = response.and_then(|response| response.into_result());
        match &outcome {
            Ok(_) => info!(
                %origin,
                id = %id,
                "{} completed in {}ms",
                name,
                started.elapsed().as_millis()
            ),
            Err(e) => warn!(%origin, id = %id, kind = %e.kind(), "{} failed: {}", name, e),
        }
        outcome.map(ToolResult::new)
    }

    async fn exchange(&self, name: &str, arguments: Arguments) -> Result<ApplicationResponse> {
        let pending = self.link.send(name, arguments).await?;
        pending.wait().await
    }

    /// Close the application link, failing anything still in flight
    pub async fn shutdown(&self) {
        self.link.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c4d_bridge::protocol::Framing;
    use c4d_bridge::testing::{FakeCinema4d, Reply, echo_response};
    use c4d_mcp_core::{CallOrigin, TransportKind};
    use serde_json::json;
    use std::collections::HashMap;

    fn request(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        };
        ToolCallRequest::new("1", name, arguments, CallOrigin::new(TransportKind::Stdio))
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("C4D_REQUEST_TIMEOUT_SECS", "2.5"),
            ("C4D_RENDER_TIMEOUT_SECS", "nope"),
        ]
        .into_iter()
        .collect();
        let config = RouterConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.render_timeout, Duration::from_secs(120));
        assert_eq!(config.deadline_for("render_frame"), Duration::from_secs(120));
        assert_eq!(config.deadline_for("list_objects"), Duration::from_millis(2500));
    }

    #[test]
    fn test_unrepresentable_deadlines_keep_defaults() {
        let vars: HashMap<&str, &str> = [
            ("C4D_REQUEST_TIMEOUT_SECS", "inf"),
            ("C4D_RENDER_TIMEOUT_SECS", "1e30"),
        ]
        .into_iter()
        .collect();
        let config = RouterConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.render_timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_unknown_command_never_reaches_application() {
        let fake = FakeCinema4d::echo().await.unwrap();
        let router = RequestRouter::new(AppLink::new(fake.link_config()), RouterConfig::default());

        match router.dispatch(request("format_disk", json!({}))).await {
            Err(BridgeError::UnknownCommand(name)) => assert_eq!(name, "format_disk"),
            other => panic!("expected UnknownCommand, got {:?}", other),
        }
        assert_eq!(fake.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_returns_payload() {
        let fake = FakeCinema4d::echo().await.unwrap();
        let router = RequestRouter::new(AppLink::new(fake.link_config()), RouterConfig::default());

        let result = router
            .dispatch(request("add_primitive", json!({"primitive_type": "sphere", "name": "Ball"})))
            .await
            .unwrap();
        assert_eq!(result.payload["command"], "add_primitive");
        assert_eq!(result.payload["arguments"]["name"], "Ball");
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_timeout() {
        let fake = FakeCinema4d::start(Framing::Ndjson, |_| Reply::Ignore).await.unwrap();
        let link = AppLink::new(fake.link_config());
        let router = RequestRouter::new(
            link.clone(),
            RouterConfig {
                request_timeout: Duration::from_millis(100),
                render_timeout: Duration::from_secs(60),
            },
        );

        match router.dispatch(request("list_objects", json!({}))).await {
            Err(BridgeError::Timeout(deadline)) => assert_eq!(deadline, Duration::from_millis(100)),
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert_eq!(link.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_render_commands_get_longer_deadline() {
        let fake = FakeCinema4d::start(Framing::Ndjson, |frame| {
            Reply::Delayed(Duration::from_millis(200), echo_response(frame))
        })
        .await
        .unwrap();
        let router = RequestRouter::new(
            AppLink::new(fake.link_config()),
            RouterConfig {
                request_timeout: Duration::from_millis(50),
                render_timeout: Duration::from_secs(5),
            },
        );

        let result = router.dispatch(request("render_frame", json!({}))).await.unwrap();
        assert_eq!(result.payload["command"], "render_frame");
        assert!(matches!(
            router.dispatch(request("list_objects", json!({}))).await,
            Err(BridgeError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_application_failure_is_not_retried() {
        let fake = FakeCinema4d::start(Framing::Ndjson, |frame| {
            Reply::Respond(c4d_bridge::ApplicationResponse::failure(
                frame.tag,
                -1,
                "Unknown primitive type: blob",
            ))
        })
        .await
        .unwrap();
        let router = RequestRouter::new(AppLink::new(fake.link_config()), RouterConfig::default());

        let err = router
            .dispatch(request("add_primitive", json!({"primitive_type": "blob"})))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Application { code: -1, .. }));
        assert_eq!(fake.received().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_across_origins() {
        const CALLS: u64 = 12;
        // Later requests are answered first
        let fake = FakeCinema4d::start(Framing::Ndjson, |frame| {
            let index = frame.arguments["name"]
                .as_str()
                .and_then(|name| name.strip_prefix("Cube-"))
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0);
            Reply::Delayed(Duration::from_millis(20 * (CALLS - index)), echo_response(frame))
        })
        .await
        .unwrap();
        let link = AppLink::new(fake.link_config());
        let router = RequestRouter::new(link.clone(), RouterConfig::default());

        let origins = [
            CallOrigin::new(TransportKind::Stdio),
            CallOrigin::with_session(TransportKind::Sse, "sse-a"),
            CallOrigin::with_session(TransportKind::StreamableHttp, "http-b"),
        ];
        let calls = (0..CALLS).map(|i| {
            let router = router.clone();
            let origin = origins[i as usize % origins.len()].clone();
            let mut arguments = Arguments::new();
            arguments.insert("primitive_type".into(), json!("cube"));
            arguments.insert("name".into(), json!(format!("Cube-{}", i)));
            async move {
                let request = ToolCallRequest::new(i.to_string(), "add_primitive", arguments, origin);
                (i, router.dispatch(request).await)
            }
        });

        let results = futures::future::join_all(calls).await;
        for (i, result) in results {
            let result = result.unwrap();
            assert_eq!(result.payload["arguments"]["name"], format!("Cube-{}", i));
        }
        assert_eq!(fake.received().len(), CALLS as usize);
        assert_eq!(link.pending_count(), 0);
    }
}
