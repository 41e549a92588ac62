use anyhow::Result;
use crossterm::{
    event::{self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::Backend};
use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Command, MonitorApp, Msg, RunOutcome};
use crate::core::api::TaskApi;
use crate::core::model::{DevRunEvent, FlowAction, Subflow, Task};
use crate::core::monitor::{DevRunToggles, MonitorChannels, StatusEvent};
use crate::core::offhours::OffHoursSource;

const INPUT_POLL: Duration = Duration::from_millis(80);
const OFF_HOURS_POLL: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const CONNECT_MESSAGE: &str = "connect";

/// What the caller needs once the terminal has been restored.
#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub task: Option<Task>,
    pub errors: Vec<String>,
}

pub async fn run_monitor_tui(
    app: MonitorApp,
    channels: MonitorChannels,
    api: Arc<dyn TaskApi>,
    off_hours: Arc<dyn OffHoursSource>,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let MonitorChannels {
        status,
        actions,
        failures,
        dev_run,
        toggles,
        handle,
    } = channels;
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let signals = spawn_signal_listener(msg_tx.clone());

    let mut driver = Driver {
        app,
        status,
        actions,
        failures,
        dev_run,
        toggles,
        api,
        off_hours,
        cancel: cancel.clone(),
        msg_tx,
        msg_rx,
        status_open: true,
        flow_announced: false,
        last_off_hours_check: None,
        tick: 0,
    };
    let res = driver.run(&mut terminal).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableBracketedPaste
    )?;
    terminal.show_cursor()?;

    signals.abort();
    cancel.cancel();
    drop(driver.status);
    drop(driver.actions);
    drop(driver.failures);
    drop(driver.dev_run);
    if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
        warn!("Monitor did not stop within {:?}", SHUTDOWN_GRACE);
    }

    res?;
    Ok(RunSummary {
        outcome: driver
            .app
            .outcome()
            .cloned()
            .unwrap_or(RunOutcome::Cancelled),
        task: driver.app.task().cloned(),
        errors: driver.app.errors().map(ToString::to_string).collect(),
    })
}

struct Driver {
    app: MonitorApp,
    status: mpsc::Receiver<StatusEvent>,
    actions: mpsc::Receiver<FlowAction>,
    failures: mpsc::Receiver<Subflow>,
    dev_run: mpsc::Receiver<DevRunEvent>,
    toggles: DevRunToggles,
    api: Arc<dyn TaskApi>,
    off_hours: Arc<dyn OffHoursSource>,
    cancel: CancellationToken,
    msg_tx: mpsc::UnboundedSender<Msg>,
    msg_rx: mpsc::UnboundedReceiver<Msg>,
    status_open: bool,
    flow_announced: bool,
    last_off_hours_check: Option<Instant>,
    tick: usize,
}

impl Driver {
    async fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()>
    where
        <B as Backend>::Error: std::error::Error + Send + Sync + 'static,
    {
        let connecting = format!("Connecting to task {}", self.app.task_id());
        self.dispatch(Msg::SetMessage {
            key: CONNECT_MESSAGE.to_string(),
            text: connecting,
            spinner: true,
        });

        loop {
            if self.app.should_quit() {
                return Ok(());
            }

            for msg in self.collect_pending() {
                self.dispatch(msg);
            }
            if self.app.should_quit() {
                return Ok(());
            }

            self.tick = self.tick.wrapping_add(1);
            let now = Instant::now();
            terminal.draw(|f| self.app.draw(f, now, self.tick))?;

            if event::poll(INPUT_POLL)? {
                match event::read()? {
                    Event::Key(key) if key.kind != KeyEventKind::Release => {
                        self.dispatch(Msg::Key(key));
                    }
                    Event::Paste(data) => self.dispatch(Msg::Paste(data)),
                    _ => {}
                }
            }

            // Submissions and signals complete on other tasks.
            tokio::task::yield_now().await;
        }
    }

    /// Drains every queue without blocking, oldest first per queue.
    fn collect_pending(&mut self) -> Vec<Msg> {
        let mut inbox = Vec::new();

        loop {
            match self.status.try_recv() {
                Ok(event) => {
                    if let StatusEvent::Changed(task) = &event {
                        if !self.flow_announced {
                            if let Some(flow_id) = task.flow_id() {
                                self.flow_announced = true;
                                inbox.push(Msg::SetMessage {
                                    key: CONNECT_MESSAGE.to_string(),
                                    text: format!("Watching flow {}", flow_id),
                                    spinner: false,
                                });
                            }
                        }
                    }
                    inbox.push(Msg::Status(event));
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if self.status_open {
                        debug!("Status queue closed");
                        self.status_open = false;
                        inbox.push(Msg::MonitorClosed);
                    }
                    break;
                }
            }
        }
        while let Ok(action) = self.actions.try_recv() {
            inbox.push(Msg::Action(action));
        }
        while let Ok(subflow) = self.failures.try_recv() {
            inbox.push(Msg::Failure(subflow));
        }
        while let Ok(event) = self.dev_run.try_recv() {
            inbox.push(Msg::DevRun(event));
        }
        while let Ok(msg) = self.msg_rx.try_recv() {
            inbox.push(msg);
        }

        let now = Instant::now();
        let due = self
            .last_off_hours_check
            .is_none_or(|at| now.duration_since(at) >= OFF_HOURS_POLL);
        if due {
            self.last_off_hours_check = Some(now);
            inbox.push(Msg::OffHours(self.off_hours.check()));
        }

        inbox.push(Msg::Tick);
        inbox
    }

    fn dispatch(&mut self, msg: Msg) {
        let commands = self.app.update(msg, Instant::now());
        for command in commands {
            self.execute(command);
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::SubmitResponse {
                workspace_id,
                action_id,
                response,
                summary,
            } => {
                let api = self.api.clone();
                let tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let msg = match api
                        .complete_flow_action(&workspace_id, &action_id, &response)
                        .await
                    {
                        Ok(()) => Msg::ResponseSubmitted { action_id, summary },
                        Err(e) => Msg::SubmitFailed {
                            action_id,
                            error: e.to_string(),
                        },
                    };
                    let _ = tx.send(msg);
                });
            }
            Command::SetDevRunOutput(toggle) => {
                self.toggles.request(toggle);
            }
            Command::PropagateCancel => {
                info!("Cancelling monitor at user request");
                self.cancel.cancel();
            }
            Command::Quit => debug!("Run finished, leaving the monitor screen"),
        }
    }
}

/// Turns process signals into cancel messages. In raw mode Ctrl+C arrives as
/// a key event instead and is handled by the coordinator directly.
fn spawn_signal_listener(tx: mpsc::UnboundedSender<Msg>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = wait_for_signal().await {
                warn!("Signal handling unavailable: {}", e);
                break;
            }
            if tx.send(Msg::CancelSignal).is_err() {
                break;
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
