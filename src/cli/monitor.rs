use anyhow::{Result, anyhow};
use console::style;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::MonitorArgs;
use crate::core::api::HttpTaskClient;
use crate::core::config::ClientConfig;
use crate::core::model::TaskStatus;
use crate::core::monitor::Monitor;
use crate::core::offhours::Unrestricted;
use crate::core::preferences::PreferenceStore;
use crate::core::terminal::{GuideSection, print_error, print_info, print_success, print_warn};
use crate::interfaces::cli::{ApprovalInput, MonitorApp, RunOutcome, run_monitor_tui};
use crate::logging;
use crate::platform::{NativePlatform, Platform};

pub async fn run_monitor(args: MonitorArgs) -> Result<()> {
    let data_dir = NativePlatform::data_dir();
    let mut config = ClientConfig::load(&data_dir).await?;
    if let Some(api_url) = args.api_url {
        config.api_url = api_url;
    }
    if let Some(workspace) = args.workspace {
        config.workspace_id = Some(workspace);
    }

    let task_id = args
        .task_id
        .ok_or_else(|| anyhow!("a task id is required"))?;
    let workspace_id = config.workspace_id.clone().ok_or_else(|| {
        anyhow!("no workspace given; pass --workspace or set workspace_id in config.toml")
    })?;

    let log_file = logging::init_logging(config.log_level());
    info!(
        "Monitoring task {} in workspace {} via {}",
        task_id, workspace_id, config.api_url
    );

    let client = Arc::new(HttpTaskClient::new(&config.api_url)?);
    let cancel = CancellationToken::new();
    let channels = Monitor::new(
        client.clone(),
        client.clone(),
        workspace_id.clone(),
        task_id.clone(),
        config.monitor_settings(),
    )
    .start(cancel.clone());

    let approval = ApprovalInput::new(
        PreferenceStore::load(PreferenceStore::default_path()),
        Some(workspace_id),
    );
    let app = MonitorApp::new(task_id.clone(), approval);
    let summary = run_monitor_tui(app, channels, client, Arc::new(Unrestricted), cancel).await?;

    let mut section = GuideSection::new("Monitor Summary").status("Task", &task_id);
    if let Some(task) = &summary.task {
        if !task.title.is_empty() {
            section = section.status("Title", &task.title);
        }
        section = section.status("Status", &style(task.status.as_str()).bold().to_string());
    }
    if let Some(path) = &log_file {
        section = section.status("Log", &path.display().to_string());
    }
    section.print();
    println!();

    if !summary.errors.is_empty() {
        print_warn(&format!("{} problem(s) during the run:", summary.errors.len()));
        for error in &summary.errors {
            print_error(error);
        }
    }

    match summary.outcome {
        RunOutcome::Finished(TaskStatus::Complete) => {
            print_success("Task complete.");
            Ok(())
        }
        RunOutcome::Finished(status) => Err(anyhow!("task ended with status {}", status.as_str())),
        RunOutcome::Failed(reason) => Err(anyhow!(reason)),
        RunOutcome::Cancelled => {
            print_info("Monitoring stopped. The task keeps running on the server.");
            Ok(())
        }
        RunOutcome::Detached => {
            print_info("Live updates ended before the task finished.");
            Ok(())
        }
    }
}
