use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;
use url::Url;

use super::{ApiError, EventStream, EventStreams, StreamChannel, TaskApi};
use crate::core::model::{Subflow, Task, UserResponse};

#[derive(Deserialize)]
struct TaskEnvelope {
    task: Task,
}

#[derive(Deserialize)]
struct SubflowEnvelope {
    subflow: Subflow,
}

/// REST + WebSocket client for the task service.
#[derive(Clone)]
pub struct HttpTaskClient {
    client: Client,
    api_base: String,
    ws_base: String,
}

impl HttpTaskClient {
    pub fn new(api_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            api_base: api_url.trim_end_matches('/').to_string(),
            ws_base: websocket_base(api_url)?,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.api_base, path);
        let res = self.client.get(&url).send().await?;
        let bytes = check_status(res).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn check_status(res: Response) -> Result<Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

fn websocket_base(api_url: &str) -> Result<String, ApiError> {
    let mut url =
        Url::parse(api_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", api_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ApiError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                other, api_url
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ApiError::InvalidUrl(api_url.to_string()))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[async_trait]
impl TaskApi for HttpTaskClient {
    async fn get_task(&self, workspace_id: &str, task_id: &str) -> Result<Task, ApiError> {
        let envelope: TaskEnvelope = self
            .get_json(&format!("/v1/workspaces/{}/tasks/{}", workspace_id, task_id))
            .await?;
        Ok(envelope.task)
    }

    async fn get_subflow(
        &self,
        workspace_id: &str,
        subflow_id: &str,
    ) -> Result<Subflow, ApiError> {
        let envelope: SubflowEnvelope = self
            .get_json(&format!(
                "/v1/workspaces/{}/subflows/{}",
                workspace_id, subflow_id
            ))
            .await?;
        Ok(envelope.subflow)
    }

    async fn complete_flow_action(
        &self,
        workspace_id: &str,
        action_id: &str,
        response: &UserResponse,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/v1/workspaces/{}/flow_actions/{}/complete",
            self.api_base, workspace_id, action_id
        );
        let payload = serde_json::json!({ "userResponse": response });
        let res = self.client.post(&url).json(&payload).send().await?;
        check_status(res).await?;
        Ok(())
    }
}

#[async_trait]
impl EventStreams for HttpTaskClient {
    async fn subscribe(
        &self,
        workspace_id: &str,
        channel: StreamChannel,
        parent_id: &str,
    ) -> Result<EventStream, ApiError> {
        let url = match &channel {
            StreamChannel::FlowActions(flow_id) => format!(
                "{}/v1/workspaces/{}/flows/{}/action_changes_ws",
                self.ws_base, workspace_id, flow_id
            ),
            StreamChannel::FlowEvents => {
                format!("{}/v1/workspaces/{}/flow_events", self.ws_base, workspace_id)
            }
        };
        debug!("Opening {:?} subscription for {} at {}", channel, parent_id, url);

        let (mut socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ApiError::WebSocket(e.to_string()))?;
        let subscribe = serde_json::json!({ "parentId": parent_id }).to_string();
        socket
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| ApiError::WebSocket(e.to_string()))?;

        let records = futures_util::stream::unfold(Some(socket), |state| async move {
            let mut socket = state?;
            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => return Some((Ok(text), Some(socket))),
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(frame)
                                if !matches!(frame.code, CloseCode::Normal | CloseCode::Away) =>
                            {
                                let err = ApiError::StreamClosed {
                                    code: u16::from(frame.code),
                                    reason: frame.reason.to_string(),
                                };
                                Some((Err(err), None))
                            }
                            _ => None,
                        };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Some((Err(ApiError::WebSocket(e.to_string())), None));
                    }
                    None => return Some((Err(ApiError::UnexpectedClose), None)),
                }
            }
        });
        Ok(records.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::websocket_base;

    #[test]
    fn websocket_base_swaps_scheme() {
        assert_eq!(
            websocket_base("http://localhost:8855/").unwrap(),
            "ws://localhost:8855"
        );
        assert_eq!(
            websocket_base("https://tasks.example.com/api").unwrap(),
            "wss://tasks.example.com/api"
        );
    }

    #[test]
    fn websocket_base_rejects_other_schemes() {
        assert!(websocket_base("ftp://example.com").is_err());
        assert!(websocket_base("not a url").is_err());
    }
}
