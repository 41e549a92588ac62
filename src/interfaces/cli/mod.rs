mod approval;
mod dev_run;
mod display;
mod events;
mod progress;
mod ui;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::model::{DevRunEvent, FlowAction, Subflow, Task, TaskStatus, UserResponse};
use crate::core::monitor::{DevRunToggle, MonitorError, StatusEvent};
use crate::core::offhours::OffHoursStatus;

pub use approval::ApprovalInput;
pub use events::run_monitor_tui;
pub use progress::ProgressAggregator;

/// A second cancel signal within this window stops the run.
pub const CANCEL_CONFIRM_WINDOW: Duration = Duration::from_secs(2);

const RESPONSE_MESSAGE: &str = "response";
/// Oldest reported errors are dropped beyond this.
pub const MAX_REPORTED_ERRORS: usize = 20;

/// Everything the update loop reacts to.
#[derive(Debug, Clone)]
pub enum Msg {
    Key(KeyEvent),
    Paste(String),
    Status(StatusEvent),
    Action(FlowAction),
    Failure(Subflow),
    DevRun(DevRunEvent),
    /// Ctrl+C, SIGINT or SIGTERM.
    CancelSignal,
    Tick,
    OffHours(OffHoursStatus),
    SetMessage {
        key: String,
        text: String,
        spinner: bool,
    },
    ResponseSubmitted {
        action_id: String,
        summary: String,
    },
    SubmitFailed {
        action_id: String,
        error: String,
    },
    /// The monitor's status queue closed.
    MonitorClosed,
}

/// Effects requested by the update loop and executed by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SubmitResponse {
        workspace_id: String,
        action_id: String,
        response: UserResponse,
        summary: String,
    },
    SetDevRunOutput(DevRunToggle),
    PropagateCancel,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(TaskStatus),
    Cancelled,
    Failed(String),
    /// The monitor stopped before the task reached a terminal status.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub spinner: bool,
    pub created_at: Instant,
}

/// An error shown under the timeline. Consecutive identical errors are
/// folded into one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub text: String,
    pub repeats: usize,
}

impl std::fmt::Display for ReportedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.repeats > 1 {
            write!(f, "{} (x{})", self.text, self.repeats)
        } else {
            f.write_str(&self.text)
        }
    }
}

/// Top-level state of the monitoring screen.
pub struct MonitorApp {
    task_id: String,
    task: Option<Task>,
    progress: ProgressAggregator,
    progress_started_at: Option<Instant>,
    messages: HashMap<String, StatusMessage>,
    errors: VecDeque<ReportedError>,
    cancel_armed_at: Option<Instant>,
    off_hours: OffHoursStatus,
    outcome: Option<RunOutcome>,
}

impl MonitorApp {
    pub fn new(task_id: impl Into<String>, approval: ApprovalInput) -> Self {
        Self {
            task_id: task_id.into(),
            task: None,
            progress: ProgressAggregator::new(approval),
            progress_started_at: None,
            messages: HashMap::new(),
            errors: VecDeque::new(),
            cancel_armed_at: None,
            off_hours: OffHoursStatus::open(),
            outcome: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    #[cfg(test)]
    pub fn progress(&self) -> &ProgressAggregator {
        &self.progress
    }

    /// The progress view exists once a flow has been discovered.
    pub fn progress_visible(&self) -> bool {
        self.progress_started_at.is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ReportedError> {
        self.errors.iter()
    }

    #[cfg(test)]
    pub fn off_hours(&self) -> &OffHoursStatus {
        &self.off_hours
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn should_quit(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn cancel_notice_visible(&self, now: Instant) -> bool {
        self.cancel_armed_at
            .is_some_and(|armed| now.duration_since(armed) <= CANCEL_CONFIRM_WINDOW)
    }

    /// Messages created before the progress view appeared, then those
    /// created after, each oldest first.
    pub fn message_groups(&self) -> (Vec<&StatusMessage>, Vec<&StatusMessage>) {
        let mut all: Vec<&StatusMessage> = self.messages.values().collect();
        all.sort_by_key(|m| m.created_at);
        match self.progress_started_at {
            None => (all, Vec::new()),
            Some(started) => all.into_iter().partition(|m| m.created_at < started),
        }
    }

    pub fn update(&mut self, msg: Msg, now: Instant) -> Vec<Command> {
        match msg {
            Msg::CancelSignal => self.on_cancel_signal(now),
            Msg::Key(key) if is_ctrl_c(&key) => self.on_cancel_signal(now),
            Msg::Tick => {
                if self.cancel_armed_at.is_some() && !self.cancel_notice_visible(now) {
                    self.cancel_armed_at = None;
                }
                Vec::new()
            }
            Msg::OffHours(status) => {
                if status.blocked != self.off_hours.blocked {
                    info!("Off-hours gate is now {}", if status.blocked { "closed" } else { "open" });
                }
                self.off_hours = status;
                Vec::new()
            }
            Msg::Key(_) | Msg::Paste(_) if self.off_hours.blocked => Vec::new(),
            Msg::Key(key) => self.progress.handle_key(key),
            Msg::Paste(text) => {
                self.progress.handle_paste(&text);
                Vec::new()
            }
            Msg::Status(event) => self.on_status(event, now),
            Msg::Action(action) => self.progress.ingest_action(action),
            Msg::Failure(subflow) => {
                self.progress.ingest_failure(subflow);
                Vec::new()
            }
            Msg::DevRun(event) => self.progress.on_dev_run(event),
            Msg::SetMessage { key, text, spinner } => {
                self.set_message(key, text, spinner, now);
                Vec::new()
            }
            Msg::ResponseSubmitted { action_id, summary } => {
                info!("Response for {} submitted: {}", action_id, summary);
                self.progress.approval_mut().on_submitted(&action_id);
                self.set_message(RESPONSE_MESSAGE.to_string(), summary, false, now);
                Vec::new()
            }
            Msg::SubmitFailed { action_id, error } => {
                warn!("Response for {} failed: {}", action_id, error);
                self.progress.approval_mut().on_submit_failed(error);
                Vec::new()
            }
            Msg::MonitorClosed => self.finish(RunOutcome::Detached),
        }
    }

    fn set_message(&mut self, key: String, text: String, spinner: bool, now: Instant) {
        let created_at = self
            .messages
            .get(&key)
            .map(|m| m.created_at)
            .unwrap_or(now);
        self.messages.insert(
            key,
            StatusMessage {
                text,
                spinner,
                created_at,
            },
        );
    }

    fn on_cancel_signal(&mut self, now: Instant) -> Vec<Command> {
        if self.cancel_notice_visible(now) {
            info!("Cancellation confirmed");
            self.cancel_armed_at = None;
            self.progress.approval_mut().quit();
            self.outcome = Some(RunOutcome::Cancelled);
            return vec![Command::PropagateCancel];
        }
        self.cancel_armed_at = Some(now);
        Vec::new()
    }

    fn on_status(&mut self, event: StatusEvent, now: Instant) -> Vec<Command> {
        match event {
            StatusEvent::Changed(task) => {
                if self.progress_started_at.is_none() && task.flow_id().is_some() {
                    self.progress_started_at = Some(now);
                }
                let status = task.status;
                self.task = Some(task);
                if status.is_terminal() {
                    return self.finish(RunOutcome::Finished(status));
                }
                Vec::new()
            }
            StatusEvent::Error(err) => {
                self.report_error(err.to_string());
                if err.is_terminal() {
                    return self.finish(RunOutcome::Failed(err.to_string()));
                }
                if let MonitorError::Stream { .. } = err {
                    warn!("Live updates degraded: {}", err);
                }
                Vec::new()
            }
        }
    }

    fn report_error(&mut self, text: String) {
        if let Some(last) = self.errors.back_mut() {
            if last.text == text {
                last.repeats += 1;
                return;
            }
        }
        if self.errors.len() == MAX_REPORTED_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(ReportedError { text, repeats: 1 });
    }

    fn finish(&mut self, outcome: RunOutcome) -> Vec<Command> {
        if self.outcome.is_some() {
            return Vec::new();
        }
        self.outcome = Some(outcome);
        vec![Command::Quit]
    }
}

fn is_ctrl_c(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
}

#[cfg(test)]
mod tests;
