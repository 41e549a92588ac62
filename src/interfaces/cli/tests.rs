use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde_json::json;
use std::time::{Duration, Instant};

use super::*;
use crate::core::model::{FlowRef, TaskStatus};
use crate::core::preferences::PreferenceStore;

fn app(dir: &tempfile::TempDir) -> MonitorApp {
    let store = PreferenceStore::load(dir.path().join("preferences.json"));
    MonitorApp::new("task_1", ApprovalInput::new(store, Some("ws_1".to_string())))
}

fn task(status: TaskStatus) -> Task {
    Task {
        id: "task_1".to_string(),
        title: "Fix the build".to_string(),
        status,
        flows: vec![FlowRef {
            id: "flow_1".to_string(),
        }],
    }
}

fn approval_request(id: &str) -> FlowAction {
    serde_json::from_value(json!({
        "id": id,
        "actionType": "user_request",
        "actionStatus": "pending",
        "actionParams": {"requestKind": "approval", "requestContent": "Run migrations?"},
        "isHumanAction": true,
        "isCallbackAction": true
    }))
    .unwrap()
}

fn key(c: char) -> Msg {
    Msg::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
}

fn ctrl_c() -> Msg {
    Msg::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL))
}

#[test]
fn two_cancels_within_window_propagate_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let t0 = Instant::now();

    assert!(app.update(Msg::CancelSignal, t0).is_empty());
    assert!(app.cancel_notice_visible(t0));
    let commands = app.update(Msg::CancelSignal, t0 + Duration::from_millis(1500));
    assert_eq!(commands, vec![Command::PropagateCancel]);
    assert_eq!(app.outcome(), Some(&RunOutcome::Cancelled));
    assert!(app.progress().approval().is_quitting());

    // Anything after confirmation starts over and cannot propagate twice.
    assert!(app.update(Msg::CancelSignal, t0 + Duration::from_millis(1600)).is_empty());
}

#[test]
fn cancels_further_apart_are_independent_first_signals() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let t0 = Instant::now();

    assert!(app.update(ctrl_c(), t0).is_empty());
    let later = t0 + Duration::from_millis(2500);
    assert!(!app.cancel_notice_visible(later));
    assert!(app.update(ctrl_c(), later).is_empty());
    assert!(app.cancel_notice_visible(later));
    assert!(app.outcome().is_none());
    assert!(!app.progress().approval().is_quitting());
}

#[test]
fn tick_expires_cancel_notice() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let t0 = Instant::now();
    app.update(Msg::CancelSignal, t0);
    app.update(Msg::Tick, t0 + Duration::from_millis(500));
    assert!(app.cancel_notice_visible(t0 + Duration::from_millis(500)));
    app.update(Msg::Tick, t0 + Duration::from_secs(3));
    assert!(!app.cancel_notice_visible(t0 + Duration::from_secs(3)));
}

#[test]
fn off_hours_gate_suppresses_input_but_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let now = Instant::now();
    app.update(Msg::Status(StatusEvent::Changed(task(TaskStatus::InProgress))), now);

    let unblock_at = Local::now() + chrono::Duration::hours(8);
    app.update(
        Msg::OffHours(OffHoursStatus::blocked("Agents are paused overnight", Some(unblock_at))),
        now,
    );
    app.update(Msg::Action(approval_request("fa_1")), now);
    assert!(app.update(key('y'), now).is_empty());
    assert!(app.off_hours().blocked);

    // Cancel still reaches the coordinator while blocked.
    app.update(Msg::CancelSignal, now);
    assert!(app.cancel_notice_visible(now));

    app.update(Msg::OffHours(OffHoursStatus::open()), now + Duration::from_secs(5));
    assert_eq!(
        app.progress().approval().pending().map(|p| p.action_id.as_str()),
        Some("fa_1")
    );
    let commands = app.update(key('y'), now + Duration::from_secs(5));
    assert!(matches!(
        commands.as_slice(),
        [Command::SubmitResponse { action_id, .. }] if action_id == "fa_1"
    ));
}

#[test]
fn messages_group_around_progress_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let t0 = Instant::now();
    let set = |key: &str, text: &str| Msg::SetMessage {
        key: key.to_string(),
        text: text.to_string(),
        spinner: false,
    };

    app.update(set("b", "second"), t0 + Duration::from_millis(20));
    app.update(set("a", "first"), t0 + Duration::from_millis(10));
    app.update(
        Msg::Status(StatusEvent::Changed(task(TaskStatus::InProgress))),
        t0 + Duration::from_millis(30),
    );
    app.update(set("d", "fourth"), t0 + Duration::from_millis(50));
    app.update(set("c", "third"), t0 + Duration::from_millis(40));

    let (before, after) = app.message_groups();
    let texts = |group: Vec<&StatusMessage>| -> Vec<String> {
        group.into_iter().map(|m| m.text.clone()).collect()
    };
    assert_eq!(texts(before), vec!["first", "second"]);
    assert_eq!(texts(after), vec!["third", "fourth"]);
}

#[test]
fn updating_a_message_keeps_its_position() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let t0 = Instant::now();
    app.update(
        Msg::SetMessage {
            key: "connect".to_string(),
            text: "Connecting".to_string(),
            spinner: true,
        },
        t0,
    );
    app.update(
        Msg::SetMessage {
            key: "connect".to_string(),
            text: "Connected".to_string(),
            spinner: false,
        },
        t0 + Duration::from_secs(1),
    );
    let (before, _) = app.message_groups();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].created_at, t0);
    assert!(!before[0].spinner);
    assert_eq!(before[0].text, "Connected");
}

#[test]
fn terminal_status_quits_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let now = Instant::now();
    assert!(app
        .update(Msg::Status(StatusEvent::Changed(task(TaskStatus::InProgress))), now)
        .is_empty());
    assert!(app.progress_visible());

    let commands = app.update(Msg::Status(StatusEvent::Changed(task(TaskStatus::Complete))), now);
    assert_eq!(commands, vec![Command::Quit]);
    assert_eq!(app.outcome(), Some(&RunOutcome::Finished(TaskStatus::Complete)));
    assert!(app.update(Msg::MonitorClosed, now).is_empty());
}

#[test]
fn only_terminal_errors_end_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let now = Instant::now();
    let transient = MonitorError::FetchTask("timeout".to_string());
    assert!(app.update(Msg::Status(StatusEvent::Error(transient)), now).is_empty());
    assert_eq!(app.errors().count(), 1);
    assert!(!app.should_quit());

    let timeout = MonitorError::FlowDiscoveryTimeout(Duration::from_secs(3));
    assert_eq!(
        app.update(Msg::Status(StatusEvent::Error(timeout)), now),
        vec![Command::Quit]
    );
    assert!(matches!(app.outcome(), Some(RunOutcome::Failed(_))));
}

#[test]
fn submission_results_flow_back_into_approval() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let now = Instant::now();
    app.update(Msg::Status(StatusEvent::Changed(task(TaskStatus::InProgress))), now);
    app.update(Msg::Action(approval_request("fa_1")), now);

    assert_eq!(app.update(key('y'), now).len(), 1);
    app.update(
        Msg::SubmitFailed {
            action_id: "fa_1".to_string(),
            error: "server returned 503".to_string(),
        },
        now,
    );
    assert_eq!(
        app.progress().approval().last_error(),
        Some("server returned 503")
    );

    assert_eq!(app.update(key('y'), now).len(), 1);
    app.update(
        Msg::ResponseSubmitted {
            action_id: "fa_1".to_string(),
            summary: "Approved".to_string(),
        },
        now,
    );
    assert!(app.progress().approval().pending().is_none());
    let (_, after) = app.message_groups();
    assert_eq!(after.last().map(|m| m.text.as_str()), Some("Approved"));
}

#[test]
fn repeated_poll_failures_fold_into_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let now = Instant::now();
    for _ in 0..600 {
        let err = MonitorError::FetchTask("connection refused".to_string());
        app.update(Msg::Status(StatusEvent::Error(err)), now);
    }
    let errors: Vec<String> = app.errors().map(ToString::to_string).collect();
    assert_eq!(
        errors,
        vec!["failed to fetch task: connection refused (x600)".to_string()]
    );
}

#[test]
fn distinct_errors_are_capped_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let now = Instant::now();
    for i in 0..(MAX_REPORTED_ERRORS + 5) {
        let err = MonitorError::FetchTask(format!("attempt {}", i));
        app.update(Msg::Status(StatusEvent::Error(err)), now);
    }
    let errors: Vec<&ReportedError> = app.errors().collect();
    assert_eq!(errors.len(), MAX_REPORTED_ERRORS);
    assert_eq!(errors[0].text, "failed to fetch task: attempt 5");
    assert!(!app.should_quit());
}

#[test]
fn showing_output_early_starts_capture_once_the_run_begins() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = app(&dir);
    let now = Instant::now();
    let ctrl_o = Msg::Key(KeyEvent::new(KeyCode::Char('o'), KeyModifiers::CONTROL));
    assert!(app.update(ctrl_o, now).is_empty());

    let commands = app.update(
        Msg::DevRun(DevRunEvent::Started {
            dev_run_id: "dr_1".to_string(),
            command_summary: None,
        }),
        now,
    );
    assert_eq!(
        commands,
        vec![Command::SetDevRunOutput(DevRunToggle {
            dev_run_id: "dr_1".to_string(),
            enabled: true,
        })]
    );
}
