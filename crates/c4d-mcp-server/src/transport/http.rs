//! Streamable HTTP transport
//!
//! Clients POST JSON-RPC messages to one endpoint. Stateful mode hands out an
//! `mcp-session-id` once `initialize` succeeds and requires it afterwards;
//! sessions idle for longer than the configured timeout are forgotten.
//! Stateless mode treats every POST as its own session. Responses come back either as
//! a JSON body or as an event stream carrying a single `message` event.

use crate::service::McpService;
use crate::settings::HttpSettings;
use crate::transport::{Transport, shutdown_signal};
use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use c4d_mcp_core::{BridgeError, CallOrigin, Result, TransportKind, error_codes};
use futures::stream;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Serves MCP over streamable HTTP
pub struct StreamableHttpTransport {
    settings: HttpSettings,
}

impl StreamableHttpTransport {
    pub fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    async fn serve(self: Box<Self>, service: McpService) -> Result<()> {
        let listener = TcpListener::bind(self.settings.bind_address())
            .await
            .map_err(|e| {
                BridgeError::Io(format!("Failed to bind {}: {}", self.settings.bind_address(), e))
            })?;
        serve_on(listener, service, self.settings, shutdown_signal()).await
    }
}

/// Serve on an already-bound listener until `shutdown` resolves
pub async fn serve_on(
    listener: TcpListener,
    service: McpService,
    settings: HttpSettings,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(
        stateless = settings.stateless_http,
        json_response = settings.json_response,
        "Streamable HTTP endpoint at {}",
        settings.with_bound_address(local).streamable_http_url()
    );

    let app = app(service.clone(), &settings);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::Io(format!("HTTP server failed: {}", e)));

    service.router().shutdown().await;
    served
}

#[derive(Clone)]
struct HttpState {
    service: McpService,
    json_response: bool,
    stateless: bool,
    idle_timeout: Duration,
    /// Session id -> last time it was used
    sessions: Arc<Mutex<HashMap<String, Instant>>>,
}

/// Axum router for the streamable HTTP endpoint
pub fn app(service: McpService, settings: &HttpSettings) -> Router {
    let state = HttpState {
        service,
        json_response: settings.json_response,
        stateless: settings.stateless_http,
        idle_timeout: settings.session_idle_timeout,
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };

    Router::new()
        .route(
            &settings.streamable_http_path,
            post(handle_post).delete(handle_delete).get(handle_get),
        )
        .with_state(state)
}

async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    let message: Value = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!("Could not parse message: {}", e);
            let error = crate::mcp::Response::error(
                None,
                error_codes::PARSE_ERROR,
                format!("Parse error: {}", e),
            );
            return (StatusCode::BAD_REQUEST, Json(error)).into_response();
        }
    };

    let session = match resolve_session(&state, &headers, &message) {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };

    let origin = CallOrigin::with_session(
        TransportKind::StreamableHttp,
        match &session {
            SessionSlot::Existing(id) | SessionSlot::Opening(id) => id.clone(),
            SessionSlot::Stateless => Uuid::new_v4().simple().to_string(),
        },
    );

    // Dropped with this future if the client hangs up, which cancels the call
    let response = state.service.handle_value(message, &origin).await;

    let session_id = match session {
        SessionSlot::Existing(id) => Some(id),
        SessionSlot::Opening(id) if response.as_ref().is_some_and(|r| r.error.is_none()) => {
            open_session(&state, &id);
            Some(id)
        }
        SessionSlot::Opening(id) => {
            debug!(session = %id, "initialize failed; no session created");
            None
        }
        SessionSlot::Stateless => None,
    };

    let mut reply = match response {
        None => StatusCode::ACCEPTED.into_response(),
        Some(response) if state.json_response => Json(response).into_response(),
        Some(response) => {
            let payload = serde_json::to_string(&response).unwrap_or_else(|e| {
                warn!("Failed to serialize response: {}", e);
                "{}".to_string()
            });
            let event = Event::default().event("message").data(payload);
            Sse::new(stream::once(async move { Ok::<_, Infallible>(event) })).into_response()
        }
    };

    if let Some(id) = session_id {
        if let Ok(value) = HeaderValue::from_str(&id) {
            reply.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    reply
}

/// Session a POST runs under
enum SessionSlot {
    /// Known, unexpired session from the request header
    Existing(String),
    /// `initialize` without a header; registered only if it succeeds
    Opening(String),
    Stateless,
}

fn resolve_session(
    state: &HttpState,
    headers: &HeaderMap,
    message: &Value,
) -> std::result::Result<SessionSlot, (StatusCode, &'static str)> {
    if state.stateless {
        return Ok(SessionSlot::Stateless);
    }

    let presented = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match presented {
        Some(id) => {
            let mut sessions = lock(&state.sessions);
            let now = Instant::now();
            let live = sessions
                .get(&id)
                .map(|last_used| now.duration_since(*last_used) <= state.idle_timeout);
            match live {
                Some(true) => {
                    sessions.insert(id.clone(), now);
                    Ok(SessionSlot::Existing(id))
                }
                Some(false) => {
                    sessions.remove(&id);
                    info!(session = %id, "HTTP session expired");
                    Err((StatusCode::NOT_FOUND, "Session not found"))
                }
                None => Err((StatusCode::NOT_FOUND, "Session not found")),
            }
        }
        None if message.get("method").and_then(Value::as_str) == Some("initialize") => {
            Ok(SessionSlot::Opening(Uuid::new_v4().simple().to_string()))
        }
        None => Err((StatusCode::BAD_REQUEST, "Missing mcp-session-id header")),
    }
}

/// Register `id`, forgetting sessions that have gone idle
fn open_session(state: &HttpState, id: &str) {
    let mut sessions = lock(&state.sessions);
    let now = Instant::now();
    let before = sessions.len();
    sessions.retain(|_, last_used| now.duration_since(*last_used) <= state.idle_timeout);
    if sessions.len() < before {
        debug!(expired = before - sessions.len(), "Dropped idle HTTP sessions");
    }
    sessions.insert(id.to_string(), now);
    info!(session = %id, "HTTP session created");
}

async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> StatusCode {
    if state.stateless {
        return StatusCode::METHOD_NOT_ALLOWED;
    }

    let Some(id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };

    if lock(&state.sessions).remove(id).is_some() {
        info!(session = %id, "HTTP session terminated");
        StatusCode::OK
    } else {
        debug!(session = %id, "DELETE for unknown session");
        StatusCode::NOT_FOUND
    }
}

/// Server-initiated streams are not offered
async fn handle_get() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
