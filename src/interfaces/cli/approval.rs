use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::Command;
use crate::core::model::{FlowAction, UserResponse};
use crate::core::params::{RequestMode, UserRequest};
use crate::core::preferences::{MergeStrategy, PreferenceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    None,
    FreeForm,
    Approval,
    RejectionFeedback,
    Continue,
}

/// Single-line editable text with a cursor counted in chars.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    text: String,
    cursor: usize,
}

impl TextBuffer {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    fn byte_index(&self, char_index: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_index)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len())
    }

    pub fn insert(&mut self, c: char) {
        let at = self.byte_index(self.cursor);
        self.text.insert(at, c);
        self.cursor += 1;
    }

    pub fn insert_str(&mut self, s: &str) {
        // Pasted newlines would submit nothing useful on a single line.
        let cleaned: String = s.chars().map(|c| if c == '\n' { ' ' } else { c }).collect();
        let at = self.byte_index(self.cursor);
        self.text.insert_str(at, &cleaned);
        self.cursor += cleaned.chars().count();
    }

    /// Applies an editing key. Returns false when the key is not an edit.
    pub fn edit(&mut self, key: &KeyEvent) -> bool {
        match key.code {
            KeyCode::Char(c)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                self.insert(c)
            }
            KeyCode::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    let at = self.byte_index(self.cursor);
                    self.text.remove(at);
                }
            }
            KeyCode::Delete => {
                if self.cursor < self.text.chars().count() {
                    let at = self.byte_index(self.cursor);
                    self.text.remove(at);
                }
            }
            KeyCode::Left => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Right => self.cursor = (self.cursor + 1).min(self.text.chars().count()),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.text.chars().count(),
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub action_id: String,
    pub request: UserRequest,
}

/// Collects the user's answer to the one outstanding human action.
///
/// No I/O happens here: a completed answer comes back as
/// [`Command::SubmitResponse`] and the driver reports the outcome through
/// [`ApprovalInput::on_submitted`] or [`ApprovalInput::on_submit_failed`].
pub struct ApprovalInput {
    workspace_id: Option<String>,
    preferences: PreferenceStore,
    mode: InputMode,
    pending: Option<PendingRequest>,
    buffer: TextBuffer,
    focused: bool,
    quitting: bool,
    submitting: bool,
    last_error: Option<String>,
}

impl ApprovalInput {
    /// Without a workspace there is nowhere to send answers and submission
    /// silently does nothing.
    pub fn new(preferences: PreferenceStore, workspace_id: Option<String>) -> Self {
        Self {
            workspace_id,
            preferences,
            mode: InputMode::None,
            pending: None,
            buffer: TextBuffer::default(),
            focused: false,
            quitting: false,
            submitting: false,
            last_error: None,
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    #[cfg(test)]
    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn merge_strategy(&self) -> MergeStrategy {
        self.preferences.merge_strategy()
    }

    pub fn set_pending(&mut self, action: &FlowAction) {
        let request = UserRequest::decode(&action.action_params);
        if let Some(current) = self.pending.as_mut() {
            // A repeat of the same action keeps the user's input unless it
            // now asks for a different kind of answer.
            if current.action_id == action.id && current.request.mode() == request.mode() {
                current.request = request;
                return;
            }
        }

        self.mode = input_mode(request.mode());
        self.focused = self.mode == InputMode::FreeForm;
        self.buffer.clear();
        self.submitting = false;
        self.last_error = None;
        self.pending = Some(PendingRequest {
            action_id: action.id.clone(),
            request,
        });
    }

    /// Retires the pending request if it is the given action.
    pub fn clear_pending(&mut self, action_id: &str) -> bool {
        if self.pending.as_ref().map(|p| p.action_id.as_str()) != Some(action_id) {
            return false;
        }
        self.pending = None;
        self.mode = InputMode::None;
        self.focused = false;
        self.submitting = false;
        self.last_error = None;
        self.buffer.clear();
        true
    }

    pub fn quit(&mut self) {
        self.quitting = true;
        self.focused = false;
    }

    pub fn on_submitted(&mut self, action_id: &str) {
        if !self.clear_pending(action_id) {
            self.submitting = false;
        }
    }

    pub fn on_submit_failed(&mut self, error: String) {
        self.submitting = false;
        self.last_error = Some(error);
    }

    pub fn handle_paste(&mut self, text: &str) {
        if self.focused && !self.quitting && !self.submitting {
            self.buffer.insert_str(text);
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Command> {
        if self.quitting || self.submitting || self.pending.is_none() {
            return None;
        }
        match self.mode {
            InputMode::None => None,
            InputMode::Approval => match key.code {
                KeyCode::Char('y') | KeyCode::Char('a') => {
                    self.submit(Some(true), String::new(), "Approved".to_string())
                }
                KeyCode::Char('n') | KeyCode::Char('r') => {
                    self.mode = InputMode::RejectionFeedback;
                    self.buffer.clear();
                    self.focused = true;
                    None
                }
                KeyCode::Char('s') if self.is_merge_approval() => {
                    self.toggle_merge_strategy();
                    None
                }
                _ => None,
            },
            InputMode::RejectionFeedback => match key.code {
                KeyCode::Esc => {
                    self.mode = InputMode::Approval;
                    self.buffer.clear();
                    self.focused = false;
                    None
                }
                KeyCode::Enter => {
                    let feedback = self.buffer.as_str().trim().to_string();
                    let summary = if feedback.is_empty() {
                        "Rejected".to_string()
                    } else {
                        format!("Rejected: {}", feedback)
                    };
                    self.submit(Some(false), feedback, summary)
                }
                _ => {
                    self.buffer.edit(&key);
                    None
                }
            },
            InputMode::Continue => match key.code {
                KeyCode::Enter => self.submit(None, String::new(), "Continued".to_string()),
                _ => None,
            },
            InputMode::FreeForm => match key.code {
                KeyCode::Enter if self.buffer.is_blank() => None,
                KeyCode::Enter => {
                    let content = self.buffer.as_str().trim().to_string();
                    self.submit(None, content.clone(), content)
                }
                KeyCode::Esc => {
                    self.buffer.clear();
                    None
                }
                _ => {
                    self.buffer.edit(&key);
                    None
                }
            },
        }
    }

    fn is_merge_approval(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.request.is_merge_approval())
    }

    fn toggle_merge_strategy(&mut self) {
        match self.preferences.toggle_merge_strategy() {
            Ok(strategy) => {
                info!("Merge strategy set to {}", strategy.as_str());
                self.last_error = None;
            }
            Err(e) => {
                warn!("Failed to persist merge strategy: {:#}", e);
                self.last_error = Some(format!("Could not save merge strategy: {}", e));
            }
        }
    }

    fn submit(
        &mut self,
        approved: Option<bool>,
        content: String,
        summary: String,
    ) -> Option<Command> {
        let pending = self.pending.as_ref()?;
        let workspace_id = self.workspace_id.clone()?;

        let params = match &pending.request {
            UserRequest::MergeApproval { target_branch, .. } => {
                let mut params = Map::new();
                if let Some(branch) = target_branch {
                    params.insert("targetBranch".to_string(), Value::from(branch.as_str()));
                }
                params.insert(
                    "mergeStrategy".to_string(),
                    Value::from(self.preferences.merge_strategy().as_str()),
                );
                Some(params)
            }
            _ => None,
        };

        let command = Command::SubmitResponse {
            workspace_id,
            action_id: pending.action_id.clone(),
            response: UserResponse {
                content,
                approved,
                params,
            },
            summary,
        };
        self.submitting = true;
        self.last_error = None;
        Some(command)
    }
}

fn input_mode(mode: RequestMode) -> InputMode {
    match mode {
        RequestMode::FreeForm => InputMode::FreeForm,
        RequestMode::Approval => InputMode::Approval,
        RequestMode::Continue => InputMode::Continue,
    }
}
