//! Application link against a fake Cinema 4D over real TCP

use bytes::Bytes;
use c4d_bridge::testing::{FakeCinema4d, Reply, echo_response};
use c4d_bridge::{
    AdmissionPolicy, AppLink, ApplicationResponse, BackoffConfig, ConnectionState, Framing,
    LinkConfig,
};
use c4d_mcp_core::{Arguments, BridgeError};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpListener;

fn args(value: serde_json::Value) -> Arguments {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Arguments::new(),
    }
}

async fn wait_for_ready(link: &AppLink) {
    let mut state = link.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *state.borrow_and_update() != ConnectionState::Ready {
            state.changed().await.unwrap();
        }
    })
    .await
    .expect("link did not become ready");
}

#[tokio::test]
async fn test_concurrent_commands_resolve_by_tag() {
    // Later commands answer first
    let fake = FakeCinema4d::start(Framing::Ndjson, |frame| {
        let index = frame.arguments["index"].as_u64().unwrap_or(0);
        Reply::Delayed(Duration::from_millis(200 - index * 20), echo_response(frame))
    })
    .await
    .unwrap();
    let link = AppLink::new(fake.link_config());

    let mut handles = Vec::new();
    for index in 0..10u64 {
        let link = link.clone();
        handles.push(tokio::spawn(async move {
            let pending = link
                .send("add_primitive", args(json!({ "index": index })))
                .await
                .unwrap();
            let payload = pending.wait().await.unwrap().into_result().unwrap();
            (index, payload)
        }));
    }

    for handle in handles {
        let (index, payload) = handle.await.unwrap();
        assert_eq!(payload["arguments"]["index"], json!(index));
    }
    assert_eq!(fake.connection_count(), 1);
    assert_eq!(link.pending_count(), 0);
}

#[tokio::test]
async fn test_tags_never_collide() {
    let fake = FakeCinema4d::echo().await.unwrap();
    let link = AppLink::new(fake.link_config());

    let mut handles = Vec::new();
    for _ in 0..50 {
        let link = link.clone();
        handles.push(tokio::spawn(async move {
            link.send("list_objects", Arguments::new())
                .await
                .unwrap()
                .wait()
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let tags: HashSet<u64> = fake.received().iter().map(|frame| frame.tag).collect();
    assert_eq!(tags.len(), 50);
}

#[tokio::test]
async fn test_application_error_is_surfaced() {
    let fake = FakeCinema4d::start(Framing::Ndjson, |frame| {
        Reply::Respond(ApplicationResponse::failure(frame.tag, -1, "Object not found: Cube.1"))
    })
    .await
    .unwrap();
    let link = AppLink::new(fake.link_config());

    let response = link
        .send("modify_object", args(json!({ "object_name": "Cube.1" })))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    match response.into_result() {
        Err(BridgeError::Application { code, message }) => {
            assert_eq!(code, -1);
            assert_eq!(message, "Object not found: Cube.1");
        }
        other => panic!("expected application error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_drop_fails_each_waiter_once() {
    let fake = FakeCinema4d::start(Framing::Ndjson, |frame| match frame.command.as_str() {
        "drop" => Reply::Disconnect,
        _ => Reply::Ignore,
    })
    .await
    .unwrap();
    let link = AppLink::new(fake.link_config());

    let mut waiting = Vec::new();
    for _ in 0..3 {
        waiting.push(link.send("render_frame", Arguments::new()).await.unwrap());
    }
    let trigger = link.send("drop", Arguments::new()).await.unwrap();

    for pending in waiting {
        assert!(matches!(pending.wait().await, Err(BridgeError::ConnectionLost(_))));
    }
    assert!(matches!(trigger.wait().await, Err(BridgeError::ConnectionLost(_))));
    assert_eq!(link.pending_count(), 0);
}

#[tokio::test]
async fn test_reconnects_after_loss() {
    let fake = FakeCinema4d::start(Framing::Ndjson, |frame| match frame.command.as_str() {
        "drop" => Reply::Disconnect,
        _ => Reply::Respond(echo_response(frame)),
    })
    .await
    .unwrap();
    let link = AppLink::new(fake.link_config());

    let lost = link.send("drop", Arguments::new()).await.unwrap().wait().await;
    assert!(matches!(lost, Err(BridgeError::ConnectionLost(_))));

    wait_for_ready(&link).await;
    let payload = link
        .send("get_scene_info", Arguments::new())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(payload["command"], "get_scene_info");
    assert_eq!(fake.connection_count(), 2);
}

#[tokio::test]
async fn test_malformed_response_resets_connection() {
    let fake = FakeCinema4d::start(Framing::Ndjson, |frame| match frame.command.as_str() {
        "garble" => Reply::Raw(Bytes::from_static(b"<html>not json</html>\n")),
        _ => Reply::Respond(echo_response(frame)),
    })
    .await
    .unwrap();
    let link = AppLink::new(fake.link_config());

    let result = link.send("garble", Arguments::new()).await.unwrap().wait().await;
    assert!(matches!(result, Err(BridgeError::ConnectionLost(_))));

    wait_for_ready(&link).await;
    assert!(link.send("list_objects", Arguments::new()).await.unwrap().wait().await.is_ok());
}

#[tokio::test]
async fn test_timeout_then_late_response_is_dropped() {
    let fake = FakeCinema4d::start(Framing::Ndjson, |frame| match frame.command.as_str() {
        "render_frame" => Reply::Delayed(Duration::from_millis(300), echo_response(frame)),
        _ => Reply::Respond(echo_response(frame)),
    })
    .await
    .unwrap();
    let link = AppLink::new(fake.link_config());

    let pending = link.send("render_frame", Arguments::new()).await.unwrap();
    let timed_out = tokio::time::timeout(Duration::from_millis(50), pending.wait()).await;
    assert!(timed_out.is_err());
    assert_eq!(link.pending_count(), 0);

    // Let the late answer arrive; it must not disturb the connection
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(link.state(), ConnectionState::Ready);

    let payload = link
        .send("get_scene_info", Arguments::new())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(payload["command"], "get_scene_info");
    assert_eq!(fake.connection_count(), 1);
}

#[tokio::test]
async fn test_unreachable_application_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let link = AppLink::new(LinkConfig {
        port,
        connect_timeout: Duration::from_secs(1),
        ..LinkConfig::default()
    });

    match link.send("get_scene_info", Arguments::new()).await {
        Err(e @ BridgeError::Connect(_)) => assert!(e.is_connection_failure()),
        other => panic!("expected ConnectError, got {:?}", other.map(|p| p.tag())),
    }
    link.close().await;
}

#[tokio::test]
async fn test_queue_waits_for_reconnect() {
    let fake = FakeCinema4d::start(Framing::Ndjson, |frame| match frame.command.as_str() {
        "drop" => Reply::Disconnect,
        _ => Reply::Respond(echo_response(frame)),
    })
    .await
    .unwrap();
    let link = AppLink::new(LinkConfig {
        admission: AdmissionPolicy::Queue { max_pending: 4 },
        ..fake.link_config()
    });

    let lost = link.send("drop", Arguments::new()).await.unwrap().wait().await;
    assert!(matches!(lost, Err(BridgeError::ConnectionLost(_))));

    // Sent while the reconnect loop is still backing off
    let payload = link
        .send("list_objects", Arguments::new())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(payload["command"], "list_objects");
}

#[tokio::test]
async fn test_queue_overflow_is_busy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let link = AppLink::new(LinkConfig {
        port,
        admission: AdmissionPolicy::Queue { max_pending: 1 },
        backoff: BackoffConfig {
            initial_delay: Duration::from_secs(30),
            ..BackoffConfig::default()
        },
        ..LinkConfig::default()
    });

    // First attempt fails and starts a slow reconnect loop
    assert!(matches!(
        link.send("list_objects", Arguments::new()).await,
        Err(BridgeError::Connect(_))
    ));

    let queued = {
        let link = link.clone();
        tokio::spawn(async move { link.send("list_objects", Arguments::new()).await.map(|p| p.tag()) })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        link.send("list_objects", Arguments::new()).await,
        Err(BridgeError::Busy)
    ));

    link.close().await;
    assert!(matches!(queued.await.unwrap(), Err(BridgeError::Shutdown)));
}

#[tokio::test]
async fn test_close_releases_waiters_with_shutdown() {
    let fake = FakeCinema4d::start(Framing::Ndjson, |_| Reply::Ignore).await.unwrap();
    let link = AppLink::new(fake.link_config());

    let pending = link.send("render_frame", Arguments::new()).await.unwrap();
    link.close().await;

    assert!(matches!(pending.wait().await, Err(BridgeError::Shutdown)));
    assert_eq!(link.state(), ConnectionState::Closed);
    assert!(matches!(
        link.send("render_frame", Arguments::new()).await,
        Err(BridgeError::Shutdown)
    ));
}

#[tokio::test]
async fn test_length_prefixed_framing() {
    let fake = FakeCinema4d::start(Framing::LengthPrefixed, |frame| {
        Reply::Respond(echo_response(frame))
    })
    .await
    .unwrap();
    let link = AppLink::new(fake.link_config());

    let payload = link
        .send("execute_python", args(json!({ "script": "print('hi')\nprint('there')" })))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(payload["arguments"]["script"], "print('hi')\nprint('there')");
}
