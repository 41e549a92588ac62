use std::collections::VecDeque;

use crate::core::model::OutputStream;
use crate::core::monitor::DevRunToggle;
use crate::core::params::DevRunContext;

pub const MAX_OUTPUT_LINES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// UI-side view of the side process attached to a merge request.
#[derive(Debug, Default)]
pub struct DevRunSession {
    dev_run_id: Option<String>,
    command_summary: Option<String>,
    working_dir: Option<String>,
    running: bool,
    show_output: bool,
    last_error: Option<String>,
    output: VecDeque<OutputLine>,
}

impl DevRunSession {
    pub fn dev_run_id(&self) -> Option<&str> {
        self.dev_run_id.as_deref()
    }

    pub fn command_summary(&self) -> Option<&str> {
        self.command_summary.as_deref()
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn shows_output(&self) -> bool {
        self.show_output
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn output(&self) -> impl Iterator<Item = &OutputLine> {
        self.output.iter()
    }

    /// Picks up identity details declared by a pending request. Values
    /// already learned from the event stream are kept. Returns a capture
    /// request when this reveals the run id while output is shown.
    pub fn adopt_context(&mut self, context: &DevRunContext) -> Option<DevRunToggle> {
        if self.command_summary.is_none() {
            self.command_summary = context.command_summary.clone();
        }
        if self.working_dir.is_none() {
            self.working_dir = context.working_dir.clone();
        }
        if self.dev_run_id.is_some() {
            return None;
        }
        self.dev_run_id = context.dev_run_id.clone();
        self.capture_request()
    }

    /// A run starting while output is shown needs its own capture; the
    /// previous sub-stream was stopped when its run ended.
    pub fn started(
        &mut self,
        dev_run_id: String,
        command_summary: Option<String>,
    ) -> Option<DevRunToggle> {
        if self.dev_run_id.as_deref() != Some(dev_run_id.as_str()) {
            self.output.clear();
        }
        self.dev_run_id = Some(dev_run_id);
        if command_summary.is_some() {
            self.command_summary = command_summary;
        }
        self.running = true;
        self.last_error = None;
        self.capture_request()
    }

    fn capture_request(&self) -> Option<DevRunToggle> {
        if !self.show_output {
            return None;
        }
        self.dev_run_id.clone().map(|dev_run_id| DevRunToggle {
            dev_run_id,
            enabled: true,
        })
    }

    pub fn ended(&mut self, dev_run_id: &str, error: Option<String>) {
        if self.dev_run_id.as_deref() == Some(dev_run_id) {
            self.running = false;
            self.last_error = error;
        }
    }

    pub fn push_output(&mut self, stream: OutputStream, chunk: &str) {
        for line in chunk.lines() {
            self.push_line(stream, line);
        }
    }

    pub fn push_line(&mut self, stream: OutputStream, text: &str) {
        if self.output.len() == MAX_OUTPUT_LINES {
            self.output.pop_front();
        }
        self.output.push_back(OutputLine {
            stream,
            text: text.to_string(),
        });
    }

    /// Flips output visibility. Running state is untouched; a toggle
    /// request is produced only once the run's id is known.
    pub fn toggle_output(&mut self) -> Option<DevRunToggle> {
        self.show_output = !self.show_output;
        self.dev_run_id.clone().map(|dev_run_id| DevRunToggle {
            dev_run_id,
            enabled: self.show_output,
        })
    }
}
