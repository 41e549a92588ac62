//! Wire and domain types shared by the monitor and the terminal UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sub-unit identifiers carry this prefix; the failure stream uses it to tell
/// subflows apart from other targets of a status change.
pub const SUBFLOW_ID_PREFIX: &str = "sf_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Complete,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRef {
    pub id: String,
}

/// Snapshot of a task as returned by the polling endpoint. Never patched
/// locally: each poll replaces the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub flows: Vec<FlowRef>,
}

impl Task {
    pub fn flow_id(&self) -> Option<&str> {
        self.flows
            .first()
            .map(|f| f.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Started,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowAction {
    pub id: String,
    #[serde(default)]
    pub flow_id: String,
    #[serde(default)]
    pub subflow_id: Option<String>,
    pub action_type: String,
    pub action_status: ActionStatus,
    #[serde(default)]
    pub action_params: Map<String, Value>,
    #[serde(default)]
    pub action_result: String,
    #[serde(default)]
    pub is_human_action: bool,
    #[serde(default)]
    pub is_callback_action: bool,
    #[serde(default)]
    pub updated: DateTime<Utc>,
}

impl FlowAction {
    /// True when the action is blocked waiting for a human decision.
    pub fn awaits_human(&self) -> bool {
        self.is_human_action
            && self.is_callback_action
            && self.action_status == ActionStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subflow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub updated: DateTime<Utc>,
}

impl Subflow {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn failure_reason(&self) -> &str {
        if self.result.is_empty() {
            "unknown error"
        } else {
            &self.result
        }
    }
}

/// Body sent back when the user answers a pending action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Records pushed on the flow-events socket, discriminated by `eventType`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
pub enum FlowEvent {
    #[serde(rename_all = "camelCase")]
    StatusChange {
        #[serde(default)]
        parent_id: String,
        target_id: String,
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    DevRunStarted {
        dev_run_id: String,
        #[serde(default)]
        command_summary: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DevRunEnded {
        dev_run_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DevRunOutput {
        dev_run_id: String,
        stream: OutputStream,
        chunk: String,
    },
    #[serde(rename_all = "camelCase")]
    EndStream {
        #[serde(default)]
        parent_id: String,
    },
    #[serde(other)]
    Unknown,
}

/// Side-process notifications delivered to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevRunEvent {
    Started {
        dev_run_id: String,
        command_summary: Option<String>,
    },
    Ended {
        dev_run_id: String,
        error: Option<String>,
    },
    Output {
        dev_run_id: String,
        stream: OutputStream,
        chunk: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_without_flows_has_no_flow_id() {
        let task: Task =
            serde_json::from_value(json!({"id": "task_1", "status": "todo"})).unwrap();
        assert_eq!(task.flow_id(), None);
        assert!(!task.status.is_terminal());
    }

    #[test]
    fn task_exposes_first_flow_id() {
        let task: Task = serde_json::from_value(json!({
            "id": "task_1",
            "status": "in_progress",
            "flows": [{"id": "flow_a"}, {"id": "flow_b"}]
        }))
        .unwrap();
        assert_eq!(task.flow_id(), Some("flow_a"));
    }

    #[test]
    fn flow_action_decodes_camel_case_record() {
        let action: FlowAction = serde_json::from_value(json!({
            "id": "fa_1",
            "flowId": "flow_a",
            "actionType": "user_request",
            "actionStatus": "pending",
            "actionParams": {"requestKind": "approval"},
            "isHumanAction": true,
            "isCallbackAction": true,
            "updated": "2025-03-01T10:00:00Z"
        }))
        .unwrap();
        assert!(action.awaits_human());
        assert_eq!(action.action_params["requestKind"], "approval");
    }

    #[test]
    fn subflow_falls_back_to_id_and_unknown_error() {
        let subflow = Subflow {
            id: "sf_1".to_string(),
            name: String::new(),
            status: "failed".to_string(),
            result: String::new(),
            updated: DateTime::<Utc>::default(),
        };
        assert_eq!(subflow.display_name(), "sf_1");
        assert_eq!(subflow.failure_reason(), "unknown error");
    }

    #[test]
    fn user_response_omits_absent_fields() {
        let body = serde_json::to_value(UserResponse {
            content: "hi".to_string(),
            approved: None,
            params: None,
        })
        .unwrap();
        assert_eq!(body, json!({"content": "hi"}));
    }

    #[test]
    fn unknown_flow_event_kind_is_tolerated() {
        let event: FlowEvent =
            serde_json::from_value(json!({"eventType": "heartbeat"})).unwrap();
        assert_eq!(event, FlowEvent::Unknown);

        let event: FlowEvent = serde_json::from_value(json!({
            "eventType": "dev_run_output",
            "devRunId": "dr_1",
            "stream": "stderr",
            "chunk": "boom\n"
        }))
        .unwrap();
        assert!(matches!(
            event,
            FlowEvent::DevRunOutput { stream: OutputStream::Stderr, .. }
        ));
    }
}
