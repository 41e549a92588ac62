//! Pure formatting helpers for action lines.

use serde_json::{Map, Value};

use crate::core::model::{ActionStatus, FlowAction};

/// Internal bookkeeping steps that never show up in the timeline.
pub const HIDDEN_ACTION_TYPES: &[&str] = &[
    "ranked_repo_summary",
    "get_symbol_definitions",
    "bulk_search_repository",
    "read_file_lines",
    "cleanup_worktree",
];

/// Shown only while it waits for the user.
pub const USER_REQUEST: &str = "user_request";

const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("merge", "Merging Changes"),
    ("apply_edit_blocks", "Applying Edits"),
    ("run_tests", "Running Tests"),
    ("run_command", "Running Command"),
    ("user_request", "Awaiting Input"),
    ("check_criteria_fulfillment", "Checking Requirements"),
    ("create_worktree", "Creating Worktree"),
    ("commit_changes", "Committing Changes"),
    ("search_repository", "Searching Repository"),
    ("dev_run", "Dev Run"),
];

const MAX_RESULT_CHARS: usize = 80;

/// Candidate param keys per displayed value; the first present one wins.
const DISPLAY_PARAMS: &[&[&str]] = &[
    &["path", "filePath", "file_path"],
    &["file", "fileName"],
    &["name", "symbolName"],
];

pub fn is_hidden_type(action_type: &str) -> bool {
    HIDDEN_ACTION_TYPES.contains(&action_type)
}

pub fn is_displayed(action: &FlowAction) -> bool {
    if is_hidden_type(&action.action_type) {
        return false;
    }
    action.action_type != USER_REQUEST || action.action_status == ActionStatus::Pending
}

pub fn action_display_name(action_type: &str) -> String {
    if let Some((_, name)) = DISPLAY_NAMES.iter().find(|(t, _)| *t == action_type) {
        return name.to_string();
    }
    if action_type.starts_with("user_request.approve.") {
        return "Awaiting Approval".to_string();
    }
    if let Some(rest) = action_type.strip_prefix("generate.") {
        return format!("Generating {}", titleize(rest));
    }
    titleize(action_type)
}

fn titleize(raw: &str) -> String {
    raw.split(['_', '.', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// First line of a result, ellipsized past 80 characters.
pub fn truncate_result(result: &str) -> String {
    let first = result.lines().next().unwrap_or_default();
    if first.chars().count() <= MAX_RESULT_CHARS {
        return first.to_string();
    }
    let kept: String = first.chars().take(MAX_RESULT_CHARS - 3).collect();
    format!("{}...", kept)
}

pub fn display_params(params: &Map<String, Value>) -> Vec<String> {
    DISPLAY_PARAMS
        .iter()
        .filter_map(|candidates| {
            candidates
                .iter()
                .find_map(|key| params.get(*key).and_then(param_text))
        })
        .collect()
}

fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(action_type: &str, status: ActionStatus) -> FlowAction {
        serde_json::from_value(json!({
            "id": "fa_1",
            "actionType": action_type,
            "actionStatus": status,
        }))
        .unwrap()
    }

    #[test]
    fn generic_names_are_titleized() {
        assert_eq!(action_display_name("some_action_type"), "Some Action Type");
        assert_eq!(action_display_name("lint.fix-imports"), "Lint Fix Imports");
    }

    #[test]
    fn prefixed_names() {
        assert_eq!(
            action_display_name("generate.multi_word_thing"),
            "Generating Multi Word Thing"
        );
        assert_eq!(
            action_display_name("user_request.approve.merge"),
            "Awaiting Approval"
        );
        assert_eq!(action_display_name("merge"), "Merging Changes");
    }

    #[test]
    fn long_results_are_cut_to_eighty() {
        let line = "x".repeat(100);
        let truncated = truncate_result(&line);
        assert_eq!(truncated.len(), 80);
        assert!(truncated.starts_with(&"x".repeat(77)));
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn only_first_result_line_is_kept() {
        assert_eq!(truncate_result("ok\nsecond line"), "ok");
        assert_eq!(truncate_result(&"y".repeat(80)), "y".repeat(80));
        assert_eq!(truncate_result(""), "");
    }

    #[test]
    fn first_candidate_key_wins() {
        let params = json!({
            "filePath": "src/b.rs",
            "path": "src/a.rs",
            "symbolName": "parse",
            "unrelated": "x"
        });
        let params = params.as_object().unwrap();
        assert_eq!(display_params(params), vec!["src/a.rs", "parse"]);
    }

    #[test]
    fn hidden_types_are_never_displayed() {
        for hidden in HIDDEN_ACTION_TYPES {
            for status in [
                ActionStatus::Pending,
                ActionStatus::Started,
                ActionStatus::Complete,
                ActionStatus::Failed,
            ] {
                assert!(!is_displayed(&action(hidden, status)));
            }
        }
    }

    #[test]
    fn user_request_displays_only_while_pending() {
        assert!(is_displayed(&action(USER_REQUEST, ActionStatus::Pending)));
        assert!(!is_displayed(&action(USER_REQUEST, ActionStatus::Started)));
        assert!(!is_displayed(&action(USER_REQUEST, ActionStatus::Complete)));
        assert!(is_displayed(&action("run_tests", ActionStatus::Complete)));
    }
}
