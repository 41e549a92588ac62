//! Event acquisition for one monitored task.
//!
//! [`Monitor::start`] discovers the task's flow, then runs one tokio task per
//! duty under a shared root [`CancellationToken`]:
//!
//! - status polling (`status.rs`)
//! - the flow's action stream and the flow-events stream (`streams.rs`)
//! - the dev-run toggle actor, which owns the optional output sub-stream
//!   (`dev_run.rs`)
//!
//! Every duty only talks to the consumer through the bounded queues in
//! [`MonitorChannels`]. The supervisor holds the last clone of each sender and
//! drops them once every duty has finished, so each queue closes exactly once.

mod dev_run;
mod status;
mod streams;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::api::{EventStreams, TaskApi};
use crate::core::model::{DevRunEvent, FlowAction, Subflow, Task};

pub const STATUS_QUEUE: usize = 16;
pub const ACTION_QUEUE: usize = 64;
pub const FAILURE_QUEUE: usize = 16;
pub const DEV_RUN_QUEUE: usize = 256;
pub const TOGGLE_QUEUE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub status_interval: Duration,
    pub flow_poll_interval: Duration,
    pub flow_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(1),
            flow_poll_interval: Duration::from_millis(200),
            flow_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("failed to fetch task: {0}")]
    FetchTask(String),
    #[error("failed to fetch subflow {id}: {detail}")]
    FetchSubflow { id: String, detail: String },
    #[error("{stream} stream failed: {detail}")]
    Stream { stream: &'static str, detail: String },
    #[error("task has no flow after {0:?}")]
    FlowDiscoveryTimeout(Duration),
}

impl MonitorError {
    /// Terminal errors end the monitoring run; the rest are informational.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorError::FlowDiscoveryTimeout(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Changed(Task),
    Error(MonitorError),
}

/// Request from the UI to show or hide live output of a dev run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevRunToggle {
    pub dev_run_id: String,
    pub enabled: bool,
}

/// Sending half of the toggle queue. Requests are dropped when one is
/// already queued; the UI re-sends on the next keypress.
#[derive(Debug, Clone)]
pub struct DevRunToggles {
    tx: mpsc::Sender<DevRunToggle>,
}

impl DevRunToggles {
    pub fn request(&self, toggle: DevRunToggle) -> bool {
        match self.tx.try_send(toggle) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping dev run toggle: {}", e);
                false
            }
        }
    }
}

pub struct MonitorChannels {
    pub status: mpsc::Receiver<StatusEvent>,
    pub actions: mpsc::Receiver<FlowAction>,
    pub failures: mpsc::Receiver<Subflow>,
    pub dev_run: mpsc::Receiver<DevRunEvent>,
    pub toggles: DevRunToggles,
    /// Resolves once every duty has stopped and all queues are closed.
    pub handle: JoinHandle<()>,
}

/// Cloned senders handed to the duties. Dropped last by the supervisor.
#[derive(Clone)]
struct Outputs {
    status: mpsc::Sender<StatusEvent>,
    actions: mpsc::Sender<FlowAction>,
    failures: mpsc::Sender<Subflow>,
    dev_run: mpsc::Sender<DevRunEvent>,
}

/// Awaits a send unless the run is cancelled first. Returns false when the
/// item could not be delivered and the caller should stop.
async fn forward<T>(tx: &mpsc::Sender<T>, cancel: &CancellationToken, item: T) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

#[derive(Clone)]
pub struct Monitor {
    api: Arc<dyn TaskApi>,
    streams: Arc<dyn EventStreams>,
    workspace_id: String,
    task_id: String,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(
        api: Arc<dyn TaskApi>,
        streams: Arc<dyn EventStreams>,
        workspace_id: impl Into<String>,
        task_id: impl Into<String>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            api,
            streams,
            workspace_id: workspace_id.into(),
            task_id: task_id.into(),
            settings,
        }
    }

    pub fn start(self, cancel: CancellationToken) -> MonitorChannels {
        let (status_tx, status_rx) = mpsc::channel(STATUS_QUEUE);
        let (actions_tx, actions_rx) = mpsc::channel(ACTION_QUEUE);
        let (failures_tx, failures_rx) = mpsc::channel(FAILURE_QUEUE);
        let (dev_run_tx, dev_run_rx) = mpsc::channel(DEV_RUN_QUEUE);
        let (toggle_tx, toggle_rx) = mpsc::channel(TOGGLE_QUEUE);

        let outputs = Outputs {
            status: status_tx,
            actions: actions_tx,
            failures: failures_tx,
            dev_run: dev_run_tx,
        };
        let handle = tokio::spawn(self.supervise(cancel, outputs, toggle_rx));

        MonitorChannels {
            status: status_rx,
            actions: actions_rx,
            failures: failures_rx,
            dev_run: dev_run_rx,
            toggles: DevRunToggles { tx: toggle_tx },
            handle,
        }
    }

    async fn supervise(
        self,
        cancel: CancellationToken,
        outputs: Outputs,
        toggle_rx: mpsc::Receiver<DevRunToggle>,
    ) {
        let Some((task, flow_id)) = status::discover_flow(
            self.api.as_ref(),
            &self.workspace_id,
            &self.task_id,
            &self.settings,
            &outputs.status,
            &cancel,
        )
        .await
        else {
            debug!("Flow discovery ended without a flow for {}", self.task_id);
            return;
        };
        info!("Monitoring task {} on flow {}", self.task_id, flow_id);

        let last_status = task.status;
        if !forward(&outputs.status, &cancel, StatusEvent::Changed(task)).await {
            return;
        }
        if last_status.is_terminal() {
            cancel.cancel();
            return;
        }

        // The stop channel is internal: failure stream -> toggle actor.
        let (stop_tx, stop_rx) = mpsc::channel::<String>(4);

        let toggle_actor = tokio::spawn(dev_run::run_toggle_actor(
            self.streams.clone(),
            self.workspace_id.clone(),
            toggle_rx,
            stop_rx,
            outputs.dev_run.clone(),
            cancel.clone(),
        ));

        let duties = vec![
            tokio::spawn(status::run_status_duty(
                self.api.clone(),
                self.workspace_id.clone(),
                self.task_id.clone(),
                last_status,
                self.settings.status_interval,
                outputs.status.clone(),
                cancel.clone(),
            )),
            tokio::spawn(streams::run_action_duty(
                self.streams.clone(),
                self.workspace_id.clone(),
                flow_id.clone(),
                outputs.clone(),
                cancel.clone(),
            )),
            tokio::spawn(streams::run_failure_duty(
                self.api.clone(),
                self.streams.clone(),
                self.workspace_id.clone(),
                flow_id,
                outputs.clone(),
                stop_tx,
                cancel.clone(),
            )),
        ];

        cancel.cancelled().await;
        debug!("Monitor cancelled, waiting for duties");

        if let Err(e) = toggle_actor.await {
            warn!("Dev run toggle actor ended abnormally: {}", e);
        }
        for duty in duties {
            if let Err(e) = duty.await {
                warn!("Monitor duty ended abnormally: {}", e);
            }
        }
        drop(outputs);
        info!("Monitor for task {} stopped", self.task_id);
    }
}
