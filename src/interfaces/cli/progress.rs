use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::HashMap;
use tracing::trace;

use super::Command;
use super::approval::ApprovalInput;
use super::dev_run::DevRunSession;
use super::display::{
    action_display_name, display_params, is_displayed, is_hidden_type, truncate_result,
};
use crate::core::model::{ActionStatus, DevRunEvent, FlowAction, Subflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Complete,
    Failed,
    Started,
    Neutral,
}

impl Marker {
    pub fn glyph(self) -> &'static str {
        match self {
            Marker::Complete => "✓",
            Marker::Failed => "✗",
            Marker::Started => "›",
            Marker::Neutral => "·",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub marker: Marker,
    pub text: String,
    /// Truncated result shown under a running action.
    pub detail: Option<String>,
}

impl TimelineEntry {
    #[cfg(test)]
    pub fn line(&self) -> String {
        format!("{} {}", self.marker.glyph(), self.text)
    }
}

/// Known actions and failed subflows of one flow, plus the input widgets
/// that hang off them.
pub struct ProgressAggregator {
    actions: Vec<FlowAction>,
    positions: HashMap<String, usize>,
    failures: Vec<Subflow>,
    approval: ApprovalInput,
    dev_run: DevRunSession,
}

impl ProgressAggregator {
    pub fn new(approval: ApprovalInput) -> Self {
        Self {
            actions: Vec::new(),
            positions: HashMap::new(),
            failures: Vec::new(),
            approval,
            dev_run: DevRunSession::default(),
        }
    }

    #[cfg(test)]
    pub fn actions(&self) -> &[FlowAction] {
        &self.actions
    }

    #[cfg(test)]
    pub fn failures(&self) -> &[Subflow] {
        &self.failures
    }

    pub fn approval(&self) -> &ApprovalInput {
        &self.approval
    }

    pub fn approval_mut(&mut self) -> &mut ApprovalInput {
        &mut self.approval
    }

    pub fn dev_run(&self) -> &DevRunSession {
        &self.dev_run
    }

    /// Returns a capture request when a pending request reveals the dev
    /// run whose output is already shown.
    pub fn ingest_action(&mut self, action: FlowAction) -> Vec<Command> {
        if is_hidden_type(&action.action_type) {
            trace!("Dropping hidden action {} ({})", action.id, action.action_type);
            return Vec::new();
        }

        let mut commands = Vec::new();
        if action.awaits_human() {
            self.approval.set_pending(&action);
            if let Some(context) = self
                .approval
                .pending()
                .and_then(|p| p.request.dev_run())
                .cloned()
            {
                commands.extend(
                    self.dev_run
                        .adopt_context(&context)
                        .map(Command::SetDevRunOutput),
                );
            }
        } else {
            self.approval.clear_pending(&action.id);
        }

        match self.positions.get(&action.id) {
            Some(&index) => self.actions[index] = action,
            None => {
                self.positions.insert(action.id.clone(), self.actions.len());
                self.actions.push(action);
            }
        }
        commands
    }

    pub fn ingest_failure(&mut self, subflow: Subflow) {
        match self.failures.iter_mut().find(|s| s.id == subflow.id) {
            Some(existing) => *existing = subflow,
            None => self.failures.push(subflow),
        }
    }

    pub fn on_dev_run(&mut self, event: DevRunEvent) -> Vec<Command> {
        match event {
            DevRunEvent::Started {
                dev_run_id,
                command_summary,
            } => {
                return self
                    .dev_run
                    .started(dev_run_id, command_summary)
                    .map(Command::SetDevRunOutput)
                    .into_iter()
                    .collect();
            }
            DevRunEvent::Ended { dev_run_id, error } => self.dev_run.ended(&dev_run_id, error),
            DevRunEvent::Output { stream, chunk, .. } => self.dev_run.push_output(stream, &chunk),
        }
        Vec::new()
    }

    /// The dev run block belongs to a pending request that declares one.
    pub fn shows_dev_run(&self) -> bool {
        self.approval
            .pending()
            .and_then(|p| p.request.dev_run())
            .is_some()
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Vec<Command> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('o') {
            return self
                .dev_run
                .toggle_output()
                .map(Command::SetDevRunOutput)
                .into_iter()
                .collect();
        }
        self.approval.handle_key(key).into_iter().collect()
    }

    pub fn handle_paste(&mut self, text: &str) {
        self.approval.handle_paste(text);
    }

    /// Displayed actions and failed subflows, oldest first.
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        let mut rows: Vec<(DateTime<Utc>, TimelineEntry)> = self
            .actions
            .iter()
            .filter(|a| is_displayed(a))
            .map(|a| (a.updated, action_entry(a)))
            .chain(self.failures.iter().map(|s| {
                let entry = TimelineEntry {
                    marker: Marker::Failed,
                    text: format!("{}: {}", s.display_name(), s.failure_reason()),
                    detail: None,
                };
                (s.updated, entry)
            }))
            .collect();
        rows.sort_by_key(|(at, _)| *at);
        rows.into_iter().map(|(_, entry)| entry).collect()
    }
}

fn action_entry(action: &FlowAction) -> TimelineEntry {
    let name = action_display_name(&action.action_type);
    match action.action_status {
        ActionStatus::Complete => TimelineEntry {
            marker: Marker::Complete,
            text: name,
            detail: None,
        },
        ActionStatus::Failed => {
            let reason = if action.action_result.is_empty() {
                "unknown error"
            } else {
                action.action_result.as_str()
            };
            TimelineEntry {
                marker: Marker::Failed,
                text: format!("{}: {}", name, reason),
                detail: None,
            }
        }
        ActionStatus::Started => {
            let params = display_params(&action.action_params);
            let text = if params.is_empty() {
                name
            } else {
                format!("{} ({})", name, params.join(", "))
            };
            let detail = Some(truncate_result(&action.action_result)).filter(|r| !r.is_empty());
            TimelineEntry {
                marker: Marker::Started,
                text,
                detail,
            }
        }
        ActionStatus::Pending => TimelineEntry {
            marker: Marker::Neutral,
            text: name,
            detail: None,
        },
    }
}
