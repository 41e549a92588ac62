//! Transport seams between the monitor and the task service.
//!
//! The monitor only talks to [`TaskApi`] and [`EventStreams`]; the production
//! implementation is [`HttpTaskClient`], tests plug in in-memory fakes.

mod http;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::core::model::{Subflow, Task, UserResponse};

pub use http::HttpTaskClient;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("stream closed with code {code}: {reason}")]
    StreamClosed { code: u16, reason: String },
    #[error("stream ended without a close frame")]
    UnexpectedClose,
}

/// Which push endpoint a subscription is opened against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    /// Action records of one flow.
    FlowActions(String),
    /// Tagged flow events (status changes, dev run lifecycle and output).
    FlowEvents,
}

/// Raw text records of one subscription. A clean server close ends the
/// stream; anything else surfaces as an `Err` item followed by the end.
pub type EventStream = BoxStream<'static, Result<String, ApiError>>;

#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn get_task(&self, workspace_id: &str, task_id: &str) -> Result<Task, ApiError>;

    async fn get_subflow(&self, workspace_id: &str, subflow_id: &str)
    -> Result<Subflow, ApiError>;

    async fn complete_flow_action(
        &self,
        workspace_id: &str,
        action_id: &str,
        response: &UserResponse,
    ) -> Result<(), ApiError>;
}

#[async_trait]
pub trait EventStreams: Send + Sync {
    /// Opens a push connection and sends the `{"parentId": ..}` subscription.
    async fn subscribe(
        &self,
        workspace_id: &str,
        channel: StreamChannel,
        parent_id: &str,
    ) -> Result<EventStream, ApiError>;
}

#[cfg(test)]
mod tests;
