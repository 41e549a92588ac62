use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{MonitorError, Outputs, StatusEvent, forward};
use crate::core::api::{ApiError, EventStream, EventStreams, StreamChannel, TaskApi};
use crate::core::model::{DevRunEvent, FlowAction, FlowEvent, SUBFLOW_ID_PREFIX};

const ACTIONS: &str = "actions";
const FLOW_EVENTS: &str = "flow events";

/// Reports a duty-ending stream failure on the status queue.
async fn report_failure(
    outputs: &Outputs,
    cancel: &CancellationToken,
    stream: &'static str,
    err: ApiError,
) {
    warn!("{} stream failed: {}", stream, err);
    let event = StatusEvent::Error(MonitorError::Stream {
        stream,
        detail: err.to_string(),
    });
    forward(&outputs.status, cancel, event).await;
}

async fn open(
    streams: &dyn EventStreams,
    workspace_id: &str,
    channel: StreamChannel,
    parent_id: &str,
    cancel: &CancellationToken,
) -> Option<Result<EventStream, ApiError>> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        opened = streams.subscribe(workspace_id, channel, parent_id) => Some(opened),
    }
}

pub(super) async fn run_action_duty(
    streams: Arc<dyn EventStreams>,
    workspace_id: String,
    flow_id: String,
    outputs: Outputs,
    cancel: CancellationToken,
) {
    let channel = StreamChannel::FlowActions(flow_id.clone());
    let mut stream = match open(streams.as_ref(), &workspace_id, channel, &flow_id, &cancel).await
    {
        None => return,
        Some(Ok(stream)) => stream,
        Some(Err(e)) => {
            report_failure(&outputs, &cancel, ACTIONS, e).await;
            return;
        }
    };

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };
        match item {
            None => {
                info!("Action stream for flow {} closed", flow_id);
                break;
            }
            Some(Ok(text)) => match serde_json::from_str::<FlowAction>(&text) {
                Ok(action) => {
                    trace!("Action {} is {:?}", action.id, action.action_status);
                    if !forward(&outputs.actions, &cancel, action).await {
                        break;
                    }
                }
                Err(e) => warn!("Skipping undecodable action record: {}", e),
            },
            Some(Err(e)) => {
                report_failure(&outputs, &cancel, ACTIONS, e).await;
                break;
            }
        }
    }
    debug!("Action duty for flow {} stopped", flow_id);
}

/// Watches the flow-events stream for failed subflows and dev run lifecycle.
/// A dev run ending also asks the toggle actor to stop its output sub-stream.
pub(super) async fn run_failure_duty(
    api: Arc<dyn TaskApi>,
    streams: Arc<dyn EventStreams>,
    workspace_id: String,
    flow_id: String,
    outputs: Outputs,
    stop_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let channel = StreamChannel::FlowEvents;
    let mut stream = match open(streams.as_ref(), &workspace_id, channel, &flow_id, &cancel).await
    {
        None => return,
        Some(Ok(stream)) => stream,
        Some(Err(e)) => {
            report_failure(&outputs, &cancel, FLOW_EVENTS, e).await;
            return;
        }
    };

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };
        let text = match item {
            None => {
                info!("Flow event stream for flow {} closed", flow_id);
                break;
            }
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                report_failure(&outputs, &cancel, FLOW_EVENTS, e).await;
                break;
            }
        };
        let event = match serde_json::from_str::<FlowEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping undecodable flow event: {}", e);
                continue;
            }
        };

        let delivered = match event {
            FlowEvent::StatusChange {
                target_id, status, ..
            } if status == "failed" && target_id.starts_with(SUBFLOW_ID_PREFIX) => {
                let fetched = tokio::select! {
                    _ = cancel.cancelled() => break,
                    fetched = api.get_subflow(&workspace_id, &target_id) => fetched,
                };
                match fetched {
                    Ok(subflow) => forward(&outputs.failures, &cancel, subflow).await,
                    Err(e) => {
                        warn!("Could not fetch failed subflow {}: {}", target_id, e);
                        let event = StatusEvent::Error(MonitorError::FetchSubflow {
                            id: target_id,
                            detail: e.to_string(),
                        });
                        forward(&outputs.status, &cancel, event).await
                    }
                }
            }
            FlowEvent::DevRunStarted {
                dev_run_id,
                command_summary,
            } => {
                let event = DevRunEvent::Started {
                    dev_run_id,
                    command_summary,
                };
                forward(&outputs.dev_run, &cancel, event).await
            }
            FlowEvent::DevRunEnded { dev_run_id, error } => {
                let event = DevRunEvent::Ended {
                    dev_run_id: dev_run_id.clone(),
                    error,
                };
                forward(&outputs.dev_run, &cancel, event).await
                    && forward(&stop_tx, &cancel, dev_run_id).await
            }
            FlowEvent::EndStream { .. } => {
                info!("Flow {} signalled end of stream", flow_id);
                break;
            }
            other => {
                trace!("Ignoring flow event {:?}", other);
                true
            }
        };
        if !delivered {
            break;
        }
    }
    debug!("Failure duty for flow {} stopped", flow_id);
}
