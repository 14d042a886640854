//! SSE transport
//!
//! `GET {sse_path}` opens a session and streams server messages;
//! `POST {message_path}?session_id=..` delivers client messages. Responses
//! are pushed on the stream of the session that posted the request.

use crate::mcp::Response;
use crate::service::McpService;
use crate::settings::HttpSettings;
use crate::transport::{Transport, shutdown_signal};
use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use c4d_mcp_core::{BridgeError, CallOrigin, Result, TransportKind};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Serves MCP over server-sent events
pub struct SseTransport {
    settings: HttpSettings,
}

impl SseTransport {
    pub fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
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
    let urls = settings.with_bound_address(local);
    info!("SSE stream at {}, messages at {}", urls.sse_url(), urls.message_url());

    let sessions = Sessions::default();
    let app = router(service.clone(), &settings, sessions.clone());

    // Open streams never finish on their own; end them so shutdown can complete
    let shutdown = async move {
        shutdown.await;
        let closed = lock(&sessions).drain().count();
        if closed > 0 {
            info!("Closed {} SSE sessions", closed);
        }
    };

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::Io(format!("SSE server failed: {}", e)));

    service.router().shutdown().await;
    served
}

/// One open SSE stream
struct Session {
    outbound: mpsc::UnboundedSender<Response>,
    /// Requests posted on this session; dropped (and aborted) with it
    in_flight: JoinSet<()>,
}

type Sessions = Arc<Mutex<HashMap<String, Session>>>;

#[derive(Clone)]
struct SseState {
    service: McpService,
    sessions: Sessions,
    message_path: String,
}

/// Removes the session when its stream is dropped
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.sessions).remove(&self.id) {
            info!(
                session = %self.id,
                aborted = session.in_flight.len(),
                "SSE session closed"
            );
        }
    }
}

/// Axum router for the SSE endpoints
pub fn app(service: McpService, settings: &HttpSettings) -> Router {
    router(service, settings, Sessions::default())
}

fn router(service: McpService, settings: &HttpSettings, sessions: Sessions) -> Router {
    let state = SseState {
        service,
        sessions,
        message_path: settings.message_path.clone(),
    };

    Router::new()
        .route(&settings.sse_path, get(open_stream))
        .route(&settings.message_path, post(post_message))
        .with_state(state)
}

async fn open_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let id = Uuid::new_v4().simple().to_string();
    let (outbound, rx) = mpsc::unbounded_channel();

    lock(&state.sessions).insert(
        id.clone(),
        Session {
            outbound,
            in_flight: JoinSet::new(),
        },
    );
    info!(session = %id, "SSE session opened");

    let endpoint = format!("{}?session_id={}", state.message_path, id);
    let guard = SessionGuard {
        id,
        sessions: state.sessions.clone(),
    };

    let first = stream::once(async move { Ok(Event::default().event("endpoint").data(endpoint)) });
    let messages = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let response = rx.recv().await?;
        let payload = serde_json::to_string(&response).unwrap_or_else(|e| {
            warn!("Failed to serialize response: {}", e);
            "{}".to_string()
        });
        let event = Event::default().event("message").data(payload);
        Some((Ok(event), (rx, guard)))
    });

    Sse::new(first.chain(messages)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: Option<String>,
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> (StatusCode, String) {
    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "session_id is required".into());
    };

    let message: Value = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!(session = %session_id, "Could not parse message: {}", e);
            return (StatusCode::BAD_REQUEST, format!("Could not parse message: {}", e));
        }
    };

    let mut sessions = lock(&state.sessions);
    let Some(session) = sessions.get_mut(&session_id) else {
        return (StatusCode::NOT_FOUND, "Could not find session".into());
    };

    // Reap finished requests before adding another
    while session.in_flight.try_join_next().is_some() {}

    let service = state.service.clone();
    let outbound = session.outbound.clone();
    let origin = CallOrigin::with_session(TransportKind::Sse, session_id);
    session.in_flight.spawn(async move {
        if let Some(response) = service.handle_value(message, &origin).await {
            if outbound.send(response).is_err() {
                debug!(%origin, "Session closed before the response was ready");
            }
        }
    });

    (StatusCode::ACCEPTED, "Accepted".into())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{RequestRouter, RouterConfig};
    use c4d_bridge::testing::{FakeCinema4d, Reply};
    use c4d_bridge::{AppLink, Framing};
    use std::time::Duration;

    #[tokio::test]
    async fn test_dropping_stream_ends_session() {
        let fake = FakeCinema4d::echo().await.unwrap();
        let service = McpService::new(RequestRouter::new(
            AppLink::new(fake.link_config()),
            RouterConfig::default(),
        ));
        let state = SseState {
            service,
            sessions: Sessions::default(),
            message_path: "/messages/".into(),
        };

        let stream = open_stream(State(state.clone())).await;
        assert_eq!(lock(&state.sessions).len(), 1);
        let session_id = lock(&state.sessions).keys().next().cloned().unwrap();

        let (status, _) = post_message(
            State(state.clone()),
            Query(MessageQuery {
                session_id: Some(session_id.clone()),
            }),
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        drop(stream);
        assert!(lock(&state.sessions).is_empty());

        let (status, _) = post_message(
            State(state),
            Query(MessageQuery {
                session_id: Some(session_id),
            }),
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#.to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_rejects_bad_json() {
        let fake = FakeCinema4d::echo().await.unwrap();
        let service = McpService::new(RequestRouter::new(
            AppLink::new(fake.link_config()),
            RouterConfig::default(),
        ));
        let state = SseState {
            service,
            sessions: Sessions::default(),
            message_path: "/messages/".into(),
        };
        let _stream = open_stream(State(state.clone())).await;
        let session_id = lock(&state.sessions).keys().next().cloned().unwrap();

        let (status, body) = post_message(
            State(state),
            Query(MessageQuery {
                session_id: Some(session_id),
            }),
            "{oops".to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Could not parse message"));
    }

    #[tokio::test]
    async fn test_dropping_stream_withdraws_in_flight_call() {
        let fake = FakeCinema4d::start(Framing::Ndjson, |_| Reply::Ignore)
            .await
            .unwrap();
        let link = AppLink::new(fake.link_config());
        let state = SseState {
            service: McpService::new(RequestRouter::new(link.clone(), RouterConfig::default())),
            sessions: Sessions::default(),
            message_path: "/messages/".into(),
        };

        let stream = open_stream(State(state.clone())).await;
        let session_id = lock(&state.sessions).keys().next().cloned().unwrap();
        let (status, _) = post_message(
            State(state.clone()),
            Query(MessageQuery {
                session_id: Some(session_id),
            }),
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"render_frame","arguments":{}}}"#
                .to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        tokio::time::timeout(Duration::from_secs(5), async {
            while fake.received().is_empty() || link.pending_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("call reached Cinema 4D");

        drop(stream);
        tokio::time::timeout(Duration::from_secs(5), async {
            while link.pending_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pending call withdrawn");
        assert!(lock(&state.sessions).is_empty());
    }
}
