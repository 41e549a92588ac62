use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use super::{ApiError, EventStreams, HttpTaskClient, StreamChannel, TaskApi};
use crate::core::model::{TaskStatus, UserResponse};

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn get_task(Path((ws, task)): Path<(String, String)>) -> impl IntoResponse {
    if task != "task_1" {
        return (StatusCode::NOT_FOUND, "no such task").into_response();
    }
    Json(json!({
        "task": {
            "id": task,
            "title": format!("task in {}", ws),
            "status": "in_progress",
            "flows": [{"id": "flow_1"}]
        }
    }))
    .into_response()
}

async fn get_subflow(Path((_ws, id)): Path<(String, String)>) -> Json<Value> {
    Json(json!({
        "subflow": {"id": id, "name": "Run tests", "status": "failed", "result": "3 failures"}
    }))
}

async fn complete_action(
    State(recorded): State<Recorded>,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorded.bodies.lock().unwrap().push(body);
    Json(json!({}))
}

async fn record_subscription(socket: &mut WebSocket, recorded: &Recorded) {
    if let Some(Ok(Message::Text(text))) = socket.recv().await {
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        recorded
            .subscriptions
            .lock()
            .unwrap()
            .push(value["parentId"].as_str().unwrap_or_default().to_string());
    }
}

async fn actions_ws(ws: WebSocketUpgrade, State(recorded): State<Recorded>) -> impl IntoResponse {
    ws.on_upgrade(move |mut socket| async move {
        record_subscription(&mut socket, &recorded).await;
        for id in ["fa_1", "fa_2"] {
            let record = json!({
                "id": id,
                "actionType": "apply_edit_blocks",
                "actionStatus": "started"
            });
            let _ = socket.send(Message::Text(record.to_string().into())).await;
        }
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "done".into(),
            })))
            .await;
    })
}

async fn events_ws(ws: WebSocketUpgrade, State(recorded): State<Recorded>) -> impl IntoResponse {
    ws.on_upgrade(move |mut socket| async move {
        record_subscription(&mut socket, &recorded).await;
        let event = json!({"eventType": "end_stream", "parentId": "flow_1"});
        let _ = socket.send(Message::Text(event.to_string().into())).await;
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::ERROR,
                reason: "backend crashed".into(),
            })))
            .await;
    })
}

async fn mock_service() -> (HttpTaskClient, Recorded) {
    let recorded = Recorded::default();
    let router = Router::new()
        .route("/v1/workspaces/{ws}/tasks/{task}", get(get_task))
        .route("/v1/workspaces/{ws}/subflows/{id}", get(get_subflow))
        .route(
            "/v1/workspaces/{ws}/flow_actions/{id}/complete",
            post(complete_action),
        )
        .route(
            "/v1/workspaces/{ws}/flows/{flow}/action_changes_ws",
            get(actions_ws),
        )
        .route("/v1/workspaces/{ws}/flow_events", get(events_ws))
        .with_state(recorded.clone());
    let base = spawn_server(router).await;
    (HttpTaskClient::new(&base).unwrap(), recorded)
}

#[tokio::test]
async fn fetches_task_snapshot() {
    let (client, _) = mock_service().await;
    let task = client.get_task("ws_1", "task_1").await.unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.flow_id(), Some("flow_1"));
    assert_eq!(task.title, "task in ws_1");
}

#[tokio::test]
async fn non_success_status_is_reported_with_body() {
    let (client, _) = mock_service().await;
    match client.get_task("ws_1", "task_404").await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such task");
        }
        other => panic!("expected status error, got {:?}", other.map(|t| t.id)),
    }
}

#[tokio::test]
async fn fetches_subflow_record() {
    let (client, _) = mock_service().await;
    let subflow = client.get_subflow("ws_1", "sf_7").await.unwrap();
    assert_eq!(subflow.id, "sf_7");
    assert_eq!(subflow.failure_reason(), "3 failures");
}

#[tokio::test]
async fn completes_flow_action_with_wrapped_response() {
    let (client, recorded) = mock_service().await;
    let response = UserResponse {
        content: String::new(),
        approved: Some(true),
        params: None,
    };
    client
        .complete_flow_action("ws_1", "fa_1", &response)
        .await
        .unwrap();
    let bodies = recorded.bodies.lock().unwrap();
    assert_eq!(
        bodies.as_slice(),
        &[json!({"userResponse": {"content": "", "approved": true}})]
    );
}

#[tokio::test]
async fn action_stream_yields_records_then_ends_on_normal_close() {
    let (client, recorded) = mock_service().await;
    let stream = client
        .subscribe("ws_1", StreamChannel::FlowActions("flow_1".into()), "flow_1")
        .await
        .unwrap();
    let items: Vec<_> = stream.collect().await;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.is_ok()));
    assert_eq!(
        recorded.subscriptions.lock().unwrap().as_slice(),
        &["flow_1".to_string()]
    );
}

#[tokio::test]
async fn abnormal_close_surfaces_as_error() {
    let (client, _) = mock_service().await;
    let mut stream = client
        .subscribe("ws_1", StreamChannel::FlowEvents, "flow_1")
        .await
        .unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    match stream.next().await {
        Some(Err(ApiError::StreamClosed { code, reason })) => {
            assert_eq!(code, 1011);
            assert_eq!(reason, "backend crashed");
        }
        other => panic!("expected abnormal close, got {:?}", other),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn connection_refused_is_a_websocket_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = HttpTaskClient::new(&format!("http://{}", addr)).unwrap();
    let result = client
        .subscribe("ws_1", StreamChannel::FlowEvents, "flow_1")
        .await;
    assert!(matches!(result, Err(ApiError::WebSocket(_))));
}
