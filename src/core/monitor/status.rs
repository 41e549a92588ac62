use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MonitorError, MonitorSettings, StatusEvent, forward};
use crate::core::api::TaskApi;
use crate::core::model::{Task, TaskStatus};

/// Polls the task until it references a flow. Returns the revealing snapshot
/// and its flow id, or `None` after reporting a timeout or on cancellation.
pub(super) async fn discover_flow(
    api: &dyn TaskApi,
    workspace_id: &str,
    task_id: &str,
    settings: &MonitorSettings,
    status_tx: &mpsc::Sender<StatusEvent>,
    cancel: &CancellationToken,
) -> Option<(Task, String)> {
    let deadline = Instant::now() + settings.flow_timeout;
    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return None,
            fetched = tokio::time::timeout_at(deadline, api.get_task(workspace_id, task_id)) => fetched,
        };
        match fetched {
            Ok(Ok(task)) => {
                if let Some(flow_id) = task.flow_id().map(str::to_string) {
                    return Some((task, flow_id));
                }
                debug!("Task {} has no flow yet", task_id);
            }
            Ok(Err(e)) => {
                warn!("Flow discovery fetch failed: {}", e);
                let event = StatusEvent::Error(MonitorError::FetchTask(e.to_string()));
                if !forward(status_tx, cancel, event).await {
                    return None;
                }
            }
            Err(_) => {}
        }

        if Instant::now() >= deadline {
            warn!(
                "No flow for task {} after {:?}",
                task_id, settings.flow_timeout
            );
            let event = StatusEvent::Error(MonitorError::FlowDiscoveryTimeout(settings.flow_timeout));
            forward(status_tx, cancel, event).await;
            return None;
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(settings.flow_poll_interval) => {}
        }
    }
}

/// Emits a status event whenever the polled status differs from the last one.
/// A terminal status cancels the whole run.
pub(super) async fn run_status_duty(
    api: Arc<dyn TaskApi>,
    workspace_id: String,
    task_id: String,
    mut last_status: TaskStatus,
    interval: Duration,
    status_tx: mpsc::Sender<StatusEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = api.get_task(&workspace_id, &task_id) => fetched,
        };
        match fetched {
            Ok(task) => {
                if task.status == last_status {
                    continue;
                }
                debug!(
                    "Task {} status {} -> {}",
                    task_id,
                    last_status.as_str(),
                    task.status.as_str()
                );
                last_status = task.status;
                if !forward(&status_tx, &cancel, StatusEvent::Changed(task)).await {
                    break;
                }
                if last_status.is_terminal() {
                    info!("Task {} reached {}", task_id, last_status.as_str());
                    cancel.cancel();
                    break;
                }
            }
            Err(e) => {
                warn!("Status poll failed: {}", e);
                let event = StatusEvent::Error(MonitorError::FetchTask(e.to_string()));
                if !forward(&status_tx, &cancel, event).await {
                    break;
                }
            }
        }
    }
    debug!("Status duty for {} stopped", task_id);
}
