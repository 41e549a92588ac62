//! Typed view over the free-form `actionParams` bag of a pending action.
//!
//! The server attaches whatever it likes to an action; the UI only cares about
//! a handful of keys per request kind. Decoding happens once, when the pending
//! action is handed to the approval input, so nothing downstream has to inspect raw
//! JSON values.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevRunContext {
    pub dev_run_id: Option<String>,
    pub working_dir: Option<String>,
    pub command_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRequest {
    FreeForm {
        content: Option<String>,
    },
    Approval {
        content: Option<String>,
        command: Option<String>,
        working_dir: Option<String>,
        approve_tag: Option<String>,
        reject_tag: Option<String>,
    },
    MergeApproval {
        content: Option<String>,
        target_branch: Option<String>,
        approve_tag: Option<String>,
        reject_tag: Option<String>,
        dev_run: Option<DevRunContext>,
    },
    Continue {
        content: Option<String>,
        continue_tag: Option<String>,
    },
    Unstructured {
        kind: String,
        content: Option<String>,
    },
}

/// How the approval input collects an answer for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    FreeForm,
    Approval,
    Continue,
}

impl UserRequest {
    pub fn decode(params: &Map<String, Value>) -> Self {
        let content = string_param(params, "requestContent");
        match string_param(params, "requestKind").as_deref() {
            None | Some("free_form") => UserRequest::FreeForm { content },
            Some("approval") => UserRequest::Approval {
                content,
                command: string_param(params, "command"),
                working_dir: string_param(params, "workingDir"),
                approve_tag: string_param(params, "approveTag"),
                reject_tag: string_param(params, "rejectTag"),
            },
            Some("merge_approval") => UserRequest::MergeApproval {
                content,
                target_branch: string_param(params, "targetBranch"),
                approve_tag: string_param(params, "approveTag"),
                reject_tag: string_param(params, "rejectTag"),
                dev_run: params
                    .get("devRunContext")
                    .and_then(Value::as_object)
                    .map(|ctx| DevRunContext {
                        dev_run_id: string_param(ctx, "devRunId"),
                        working_dir: string_param(ctx, "workingDir"),
                        command_summary: string_param(ctx, "commandSummary"),
                    }),
            },
            Some("continue") => UserRequest::Continue {
                content,
                continue_tag: string_param(params, "continueTag"),
            },
            Some(other) => UserRequest::Unstructured {
                kind: other.to_string(),
                content,
            },
        }
    }

    pub fn mode(&self) -> RequestMode {
        match self {
            UserRequest::Approval { .. } | UserRequest::MergeApproval { .. } => {
                RequestMode::Approval
            }
            UserRequest::Continue { .. } => RequestMode::Continue,
            UserRequest::FreeForm { .. } | UserRequest::Unstructured { .. } => {
                RequestMode::FreeForm
            }
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            UserRequest::FreeForm { content }
            | UserRequest::Approval { content, .. }
            | UserRequest::MergeApproval { content, .. }
            | UserRequest::Continue { content, .. }
            | UserRequest::Unstructured { content, .. } => content.as_deref(),
        }
    }

    pub fn is_merge_approval(&self) -> bool {
        matches!(self, UserRequest::MergeApproval { .. })
    }

    pub fn dev_run(&self) -> Option<&DevRunContext> {
        match self {
            UserRequest::MergeApproval { dev_run, .. } => dev_run.as_ref(),
            _ => None,
        }
    }

    pub fn approve_label(&self) -> &str {
        match self {
            UserRequest::Approval { approve_tag, .. }
            | UserRequest::MergeApproval { approve_tag, .. } => {
                approve_tag.as_deref().unwrap_or("Approve")
            }
            _ => "Approve",
        }
    }

    pub fn reject_label(&self) -> &str {
        match self {
            UserRequest::Approval { reject_tag, .. }
            | UserRequest::MergeApproval { reject_tag, .. } => {
                reject_tag.as_deref().unwrap_or("Reject")
            }
            _ => "Reject",
        }
    }

    pub fn continue_label(&self) -> &str {
        match self {
            UserRequest::Continue { continue_tag, .. } => {
                continue_tag.as_deref().unwrap_or("Continue")
            }
            _ => "Continue",
        }
    }
}

fn string_param(params: &Map<String, Value>, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
