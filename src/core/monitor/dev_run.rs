use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{DevRunToggle, forward};
use crate::core::api::{EventStreams, StreamChannel};
use crate::core::model::{DevRunEvent, FlowEvent};

struct ActiveOutput {
    dev_run_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveOutput {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Output sub-stream for {} ended abnormally: {}", self.dev_run_id, e);
        }
    }
}

/// Owns the output sub-stream. Toggle requests come from the UI, stop
/// requests from the failure duty when a dev run ends.
pub(super) async fn run_toggle_actor(
    streams: Arc<dyn EventStreams>,
    workspace_id: String,
    mut toggles: mpsc::Receiver<DevRunToggle>,
    mut stops: mpsc::Receiver<String>,
    dev_run_tx: mpsc::Sender<DevRunEvent>,
    cancel: CancellationToken,
) {
    let mut active: Option<ActiveOutput> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(toggle) = toggles.recv() => {
                if toggle.enabled {
                    let running = active.as_ref().is_some_and(|a| !a.handle.is_finished());
                    if running {
                        debug!("Output sub-stream already active, ignoring start for {}", toggle.dev_run_id);
                        continue;
                    }
                    if let Some(finished) = active.take() {
                        finished.stop().await;
                    }
                    active = Some(spawn_output(
                        streams.clone(),
                        workspace_id.clone(),
                        toggle.dev_run_id,
                        dev_run_tx.clone(),
                    ));
                } else {
                    active = stop_matching(active, &toggle.dev_run_id).await;
                }
            }
            Some(dev_run_id) = stops.recv() => {
                active = stop_matching(active, &dev_run_id).await;
            }
            else => {
                cancel.cancelled().await;
                break;
            }
        }
    }

    if let Some(output) = active.take() {
        output.stop().await;
    }
    debug!("Dev run toggle actor stopped");
}

async fn stop_matching(active: Option<ActiveOutput>, dev_run_id: &str) -> Option<ActiveOutput> {
    match active {
        Some(output) if output.dev_run_id == dev_run_id => {
            info!("Stopping output sub-stream for {}", dev_run_id);
            output.stop().await;
            None
        }
        other => other,
    }
}

fn spawn_output(
    streams: Arc<dyn EventStreams>,
    workspace_id: String,
    dev_run_id: String,
    dev_run_tx: mpsc::Sender<DevRunEvent>,
) -> ActiveOutput {
    // Independent of the root token; the actor cancels it on stop and on exit.
    let cancel = CancellationToken::new();
    info!("Starting output sub-stream for {}", dev_run_id);
    let handle = tokio::spawn(run_output_stream(
        streams,
        workspace_id,
        dev_run_id.clone(),
        dev_run_tx,
        cancel.clone(),
    ));
    ActiveOutput {
        dev_run_id,
        cancel,
        handle,
    }
}

async fn run_output_stream(
    streams: Arc<dyn EventStreams>,
    workspace_id: String,
    dev_run_id: String,
    dev_run_tx: mpsc::Sender<DevRunEvent>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = streams.subscribe(&workspace_id, StreamChannel::FlowEvents, &dev_run_id) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not open output stream for {}: {}", dev_run_id, e);
            return;
        }
    };

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };
        let text = match item {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                warn!("Output stream for {} failed: {}", dev_run_id, e);
                break;
            }
            None => break,
        };
        match serde_json::from_str::<FlowEvent>(&text) {
            Ok(FlowEvent::DevRunOutput {
                dev_run_id: id,
                stream: source,
                chunk,
            }) if id == dev_run_id => {
                let event = DevRunEvent::Output {
                    dev_run_id: id,
                    stream: source,
                    chunk,
                };
                if !forward(&dev_run_tx, &cancel, event).await {
                    break;
                }
            }
            Ok(FlowEvent::EndStream { .. }) => {
                debug!("Output stream for {} ended", dev_run_id);
                break;
            }
            Ok(other) => trace!("Ignoring output stream event {:?}", other),
            Err(e) => warn!("Skipping undecodable output event: {}", e),
        }
    }
}
