//! Integration tests for the push-channel transport.
//!
//! Each test starts an in-process axum server that speaks the same protocol
//! as a real MCP server: `GET /sse` opens the event stream and announces a
//! session, `POST /messages/?session_id=...` accepts JSON-RPC submissions.
//! The mock's behaviour is selected by the request method.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use pushrpc_core::{
    McpClient, RpcMessage, RpcOutcome, SseTransport, TransportConfig, TransportError,
    TransportStatus,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct MockInner {
    announce: bool,
    connections: AtomicUsize,
    current_session: Mutex<Option<String>>,
    push_tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    received: Mutex<Vec<Value>>,
}

#[derive(Clone)]
struct MockState(Arc<MockInner>);

impl MockState {
    fn push(&self, message: Value) {
        if let Some(tx) = self.0.push_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Event::default().data(message.to_string()));
        }
    }

    fn reply(&self, id: &Value, result: Value) {
        self.push(json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    fn received(&self) -> Vec<Value> {
        self.0.received.lock().unwrap().clone()
    }
}

struct MockServer {
    addr: SocketAddr,
    state: MockState,
}

impl MockServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn config(&self) -> TransportConfig {
        TransportConfig::new(&self.url("/sse"))
            .unwrap()
            .with_handshake_timeout(Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(5))
    }

    fn transport(&self) -> SseTransport {
        SseTransport::new(self.config()).unwrap()
    }
}

async fn start_mock_server(announce: bool) -> MockServer {
    let state = MockState(Arc::new(MockInner {
        announce,
        ..Default::default()
    }));

    let app = Router::new()
        .route("/sse", get(sse_handler))
        .route("/messages/", post(messages_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockServer { addr, state }
}

async fn sse_handler(
    State(state): State<MockState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let n = state.0.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let session_id = format!("sess-{}", n);
    *state.0.current_session.lock().unwrap() = Some(session_id.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    *state.0.push_tx.lock().unwrap() = Some(tx);

    let mut first = vec![Event::default().comment("keep-alive")];
    if state.0.announce {
        first.push(
            Event::default()
                .event("endpoint")
                .data(format!("/messages/?session_id={}", session_id)),
        );
    }

    let pushed = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    });

    Sse::new(stream::iter(first).chain(pushed).map(Ok))
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: String,
}

async fn messages_handler(
    State(state): State<MockState>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<Value>,
) -> Response {
    let current = state.0.current_session.lock().unwrap().clone();
    if current.as_deref() != Some(query.session_id.as_str()) {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    }
    state.0.received.lock().unwrap().push(body.clone());

    // Notifications get no answer
    let Some(id) = body.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };
    let method = body["method"].as_str().unwrap_or_default();
    let params = body.get("params").cloned().unwrap_or(Value::Null);

    match method {
        "echo" => state.reply(&id, params),
        "direct" => {
            return Json(json!({"jsonrpc": "2.0", "id": id, "result": {"direct": true}}))
                .into_response();
        }
        "remote_error" => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            }))
            .into_response();
        }
        "misdirected" => {
            let wrong_id = id.as_u64().unwrap_or_default().saturating_sub(1);
            return Json(json!({"jsonrpc": "2.0", "id": wrong_id, "result": {"for": id}}))
                .into_response();
        }
        "explode" => return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        "silent" => {}
        "announce" => {
            state.push(json!({
                "jsonrpc": "2.0",
                "method": "notifications/progress",
                "params": {"progress": 50}
            }));
            state.reply(&id, json!("done"));
        }
        "hangup" => {
            state.0.push_tx.lock().unwrap().take();
        }
        "initialize" => state.reply(
            &id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock", "version": "0.1.0"}
            }),
        ),
        "tools/list" => state.reply(
            &id,
            json!({"tools": [
                {"name": "list_functions", "description": "List all functions"},
                {
                    "name": "decompile_function",
                    "inputSchema": {"type": "object", "properties": {"name": {"type": "string"}}}
                }
            ]}),
        ),
        "tools/call" => match params["name"].as_str() {
            Some("decompile_function") => state.reply(
                &id,
                json!({"content": [
                    {"type": "text", "text": "int main() {"},
                    {"type": "text", "text": "}"}
                ]}),
            ),
            Some("rename_function") => {
                return Json(json!({"jsonrpc": "2.0", "id": id, "result": "Renamed"}))
                    .into_response();
            }
            _ => state.reply(
                &id,
                json!({"content": [{"type": "text", "text": "Unknown tool"}], "isError": true}),
            ),
        },
        _ => state.push(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found"}
        })),
    }

    StatusCode::ACCEPTED.into_response()
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

#[tokio::test]
async fn test_connect_establishes_session() {
    let server = start_mock_server(true).await;
    let transport = server.transport();

    let session = transport.connect().await.unwrap();

    assert_eq!(session.session_id(), "sess-1");
    assert_eq!(
        session.submission_endpoint().as_str(),
        server.url("/messages/")
    );
    assert!(transport.is_connected());
    assert_eq!(
        *transport.status().borrow(),
        TransportStatus::Connected {
            session_id: "sess-1".to_string()
        }
    );
}

#[tokio::test]
async fn test_response_delivered_over_stream() {
    let server = start_mock_server(true).await;
    let transport = server.transport();
    transport.connect().await.unwrap();

    let outcome = transport
        .request("echo", json!({"value": 42}))
        .await
        .unwrap();

    assert_eq!(outcome, RpcOutcome::Success(json!({"value": 42})));
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_response_delivered_in_submission_reply() {
    let server = start_mock_server(true).await;
    let transport = server.transport();
    transport.connect().await.unwrap();

    let result = transport.call("direct", json!({})).await.unwrap();

    assert_eq!(result, json!({"direct": true}));
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_direct_reply_with_wrong_id_answers_its_own_request() {
    let server = start_mock_server(true).await;
    let transport = Arc::new(server.transport());
    transport.connect().await.unwrap();

    let earlier = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.request("silent", json!({})).await })
    };
    wait_until(|| server.state.received().len() == 1).await;
    let earlier_id = server.state.received()[0]["id"].as_u64().unwrap();

    let outcome = transport
        .request_with_timeout("misdirected", json!({}), Duration::from_secs(2))
        .await
        .unwrap();

    // The reply echoes the earlier request's id but belongs to this one
    let own_id = server
        .state
        .received()
        .iter()
        .find(|body| body["method"] == "misdirected")
        .and_then(|body| body["id"].as_u64())
        .unwrap();
    assert_eq!(own_id - 1, earlier_id);
    assert_eq!(outcome, RpcOutcome::Success(json!({"for": own_id})));
    assert_eq!(transport.pending_requests(), 1);

    transport.disconnect();
    assert_eq!(earlier.await.unwrap().unwrap(), RpcOutcome::Cancelled);
}

#[tokio::test]
async fn test_remote_error_is_an_outcome() {
    let server = start_mock_server(true).await;
    let transport = server.transport();
    transport.connect().await.unwrap();

    match transport.request("remote_error", json!({})).await.unwrap() {
        RpcOutcome::RemoteError(error) => {
            assert_eq!(error.code, -32601);
            assert_eq!(error.message, "Method not found");
        }
        other => panic!("Expected RemoteError, got: {:?}", other),
    }

    // Same error pushed over the stream, flattened by call()
    let err = transport.call("no_such_method", json!({})).await.unwrap_err();
    assert!(matches!(err, TransportError::Remote { code: -32601, .. }));
}

#[tokio::test]
async fn test_rejected_submission_leaves_no_pending_entry() {
    let server = start_mock_server(true).await;
    let transport = server.transport();
    transport.connect().await.unwrap();

    match transport.request("explode", json!({})).await {
        Err(TransportError::Submission { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("Expected Submission error, got: {:?}", other),
    }
    assert_eq!(transport.pending_requests(), 0);

    // The connection is unaffected
    assert!(transport.is_connected());
    let outcome = transport.request("echo", json!("still here")).await.unwrap();
    assert_eq!(outcome, RpcOutcome::Success(json!("still here")));
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let server = start_mock_server(true).await;
    let transport = server.transport();
    transport.connect().await.unwrap();

    let outcome = transport
        .request_with_timeout("silent", json!({}), Duration::from_millis(200))
        .await
        .unwrap();

    assert_eq!(outcome, RpcOutcome::TimedOut);
    assert_eq!(transport.pending_requests(), 0);
    assert!(transport.is_connected());
}

#[tokio::test]
async fn test_concurrent_requests_are_correlated() {
    let server = start_mock_server(true).await;
    let transport = server.transport();
    transport.connect().await.unwrap();

    let requests = (0..10).map(|n| transport.request("echo", json!({"n": n})));
    let outcomes = futures::future::join_all(requests).await;

    for (n, outcome) in outcomes.into_iter().enumerate() {
        assert_eq!(outcome.unwrap(), RpcOutcome::Success(json!({"n": n})));
    }

    let ids: Vec<u64> = server
        .state
        .received()
        .iter()
        .filter_map(|body| body["id"].as_u64())
        .collect();
    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
}

#[tokio::test]
async fn test_handshake_timeout_without_endpoint_event() {
    let server = start_mock_server(false).await;
    let transport = SseTransport::new(
        server
            .config()
            .with_handshake_timeout(Duration::from_millis(200)),
    )
    .unwrap();

    let err = transport.connect().await.unwrap_err();

    assert!(matches!(err, TransportError::HandshakeTimeout(_)));
    assert!(!transport.is_connected());
    assert!(matches!(
        *transport.status().borrow(),
        TransportStatus::Failed { .. }
    ));
}

#[tokio::test]
async fn test_connect_rejected_by_status() {
    let server = start_mock_server(true).await;
    let transport =
        SseTransport::new(TransportConfig::new(&server.url("/missing")).unwrap()).unwrap();

    match transport.connect().await {
        Err(TransportError::Connection { status, .. }) => assert_eq!(status, Some(404)),
        other => panic!("Expected Connection error, got: {:?}", other),
    }
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_disconnect_cancels_pending_requests() {
    let server = start_mock_server(true).await;
    let transport = Arc::new(server.transport());
    transport.connect().await.unwrap();

    let waiting = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.request("silent", json!({})).await })
    };
    wait_until(|| server.state.received().len() == 1).await;

    transport.disconnect();

    assert_eq!(waiting.await.unwrap().unwrap(), RpcOutcome::Cancelled);
    assert_eq!(transport.pending_requests(), 0);
    assert_eq!(*transport.status().borrow(), TransportStatus::Disconnected);
    assert!(matches!(
        transport.request("echo", json!({})).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_server_close_fails_transport() {
    let server = start_mock_server(true).await;
    let transport = server.transport();
    let mut status = transport.status();
    transport.connect().await.unwrap();

    // The server ends the stream before answering
    let outcome = transport.request("hangup", json!({})).await.unwrap();
    assert_eq!(outcome, RpcOutcome::Cancelled);

    status
        .wait_for(|s| matches!(s, TransportStatus::Failed { .. }))
        .await
        .unwrap();
    assert!(!transport.is_connected());
    assert!(matches!(
        transport.request("echo", json!({})).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let server = start_mock_server(true).await;
    let transport = Arc::new(server.transport());
    transport.connect().await.unwrap();

    let waiting = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.request("silent", json!({})).await })
    };
    wait_until(|| server.state.received().len() == 1).await;

    let session = transport.connect().await.unwrap();
    assert_eq!(session.session_id(), "sess-2");
    assert_eq!(waiting.await.unwrap().unwrap(), RpcOutcome::Cancelled);

    let outcome = transport.request("echo", json!(1)).await.unwrap();
    assert_eq!(outcome, RpcOutcome::Success(json!(1)));

    // Ids keep increasing across connections
    let ids: Vec<u64> = server
        .state
        .received()
        .iter()
        .filter_map(|body| body["id"].as_u64())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1]);
}

#[tokio::test]
async fn test_server_messages_reach_observer() {
    let server = start_mock_server(true).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<RpcMessage>();
    let transport = server.transport().with_observer(Arc::new(tx));
    transport.connect().await.unwrap();

    let outcome = transport.request("announce", json!({})).await.unwrap();
    assert_eq!(outcome, RpcOutcome::Success(json!("done")));

    let message = rx.recv().await.unwrap();
    assert_eq!(message.method.as_deref(), Some("notifications/progress"));
    assert_eq!(message.params, Some(json!({"progress": 50})));
}

#[tokio::test]
async fn test_notify_sends_message_without_id() {
    let server = start_mock_server(true).await;
    let transport = server.transport();
    transport.connect().await.unwrap();

    transport
        .notify("notifications/initialized", json!({}))
        .await
        .unwrap();

    let received = server.state.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["method"], "notifications/initialized");
    assert!(received[0].get("id").is_none());
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_mcp_client_flow() {
    let server = start_mock_server(true).await;
    let client = McpClient::new(server.transport());

    let init = client.connect().await.unwrap();
    assert_eq!(init.protocol_version.as_deref(), Some("2024-11-05"));

    let received = server.state.received();
    assert_eq!(received[0]["method"], "initialize");
    assert_eq!(received[0]["params"]["protocolVersion"], "2024-11-05");
    assert_eq!(received[0]["params"]["clientInfo"]["name"], "pushrpc");
    assert_eq!(received[1]["method"], "notifications/initialized");

    let tools = client.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["list_functions", "decompile_function"]);
    assert!(tools[1].input_schema.is_some());

    let result = client
        .call_tool("decompile_function", json!({"name": "main"}))
        .await
        .unwrap();
    assert_eq!(result.text(), "int main() {\n}");

    let result = client
        .call_tool("rename_function", json!({"old_name": "a", "new_name": "b"}))
        .await
        .unwrap();
    assert_eq!(result.text(), "Renamed");

    let result = client.call_tool("bogus", json!({})).await.unwrap();
    assert!(result.is_error);
}

#[tokio::test]
async fn test_mcp_connect_failure_leaves_transport_disconnected() {
    let server = start_mock_server(false).await;
    let transport = SseTransport::new(
        server
            .config()
            .with_handshake_timeout(Duration::from_millis(200)),
    )
    .unwrap();
    let client = McpClient::new(transport);

    assert!(client.connect().await.is_err());
    assert!(!client.transport().is_connected());
    assert!(server.state.received().is_empty());
}
