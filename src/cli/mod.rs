mod monitor;

use anyhow::Result;
use console::style;

use crate::core::terminal::{self, GuideSection, print_error};
use crate::platform::DATA_DIR_ENV;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Commands")
        .command("monitor <task-id>", "Follow a task until it finishes")
        .command("help", "Show this help")
        .print();

    GuideSection::new("Monitor options")
        .command("--workspace, -w <id>", "Workspace the task belongs to")
        .command("--api-url <url>", "Task service base URL")
        .print();

    GuideSection::new("While monitoring")
        .command("y / n", "Approve or reject a pending request")
        .command("s", "Switch merge strategy on merge approvals")
        .command("Ctrl+O", "Show or hide dev run output")
        .command("Ctrl+C twice", "Stop monitoring")
        .print();

    GuideSection::new("Configuration")
        .text("Settings are read from config.toml in the data directory:")
        .text("api_url, workspace_id, status_poll_ms, flow_poll_ms, flow_timeout_ms, log_level")
        .blank()
        .info(&format!(
            "Set {} to use another data directory.",
            style(DATA_DIR_ENV).cyan()
        ))
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("flowwatch").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MonitorArgs {
    pub task_id: Option<String>,
    pub workspace: Option<String>,
    pub api_url: Option<String>,
}

pub(crate) fn parse_monitor_args(args: &[String], start: usize) -> MonitorArgs {
    let mut parsed = MonitorArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--workspace" | "-w" => {
                if i + 1 < args.len() {
                    parsed.workspace = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-url" => {
                if i + 1 < args.len() {
                    parsed.api_url = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            other => {
                if parsed.task_id.is_none() && !other.starts_with('-') {
                    parsed.task_id = Some(other.to_string());
                }
                i += 1;
            }
        }
    }
    parsed
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let cmd = args.get(1).map(String::as_str).unwrap_or("help");
    match cmd {
        "monitor" | "watch" => {
            let parsed = parse_monitor_args(&args, 2);
            if parsed.task_id.is_none() {
                print_error("Error: a task id is required, e.g. 'flowwatch monitor task_123'.");
                print_help();
                return Ok(());
            }
            monitor::run_monitor(parsed).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'.", other));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_monitor_args;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_monitor_args_reads_task_and_flags() {
        let parsed = parse_monitor_args(
            &args(&[
                "flowwatch",
                "monitor",
                "task_42",
                "--workspace",
                "ws_7",
                "--api-url",
                "http://127.0.0.1:9000",
            ]),
            2,
        );
        assert_eq!(parsed.task_id.as_deref(), Some("task_42"));
        assert_eq!(parsed.workspace.as_deref(), Some("ws_7"));
        assert_eq!(parsed.api_url.as_deref(), Some("http://127.0.0.1:9000"));
    }

    #[test]
    fn parse_monitor_args_accepts_flags_before_task() {
        let parsed = parse_monitor_args(&args(&["flowwatch", "monitor", "-w", "ws_1", "task_9"]), 2);
        assert_eq!(parsed.task_id.as_deref(), Some("task_9"));
        assert_eq!(parsed.workspace.as_deref(), Some("ws_1"));
        assert_eq!(parsed.api_url, None);
    }

    #[test]
    fn parse_monitor_args_ignores_dangling_flag() {
        let parsed = parse_monitor_args(&args(&["flowwatch", "monitor", "task_1", "--api-url"]), 2);
        assert_eq!(parsed.task_id.as_deref(), Some("task_1"));
        assert_eq!(parsed.api_url, None);
    }
}
