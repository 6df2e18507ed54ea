//! Host: the requesting side of the host/client link
//!
//! The host submits runs to a client and follows their progress. Every
//! outbound message from the client updates the host's run table and is
//! handed to the caller's [`HostEvents`].

use crate::bus::Bus;
use crate::process::ProcessLauncher;
use crate::stream::{BoxReader, Duplex, MessageWriter};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xtmf_core::{BusConfig, Error, InboundCommand, OutboundCommand, Result, RunId, RunRequest};

/// Callbacks for messages arriving from a client. Every method defaults to
/// doing nothing.
pub trait HostEvents: Send + Sync + 'static {
    fn on_client_ready(&self) {}
    fn on_heartbeat(&self, _current: Option<&RunId>) {}
    fn on_run_finished(&self, _id: &RunId) {}
    fn on_validation_error(&self, _id: &RunId, _message: &str) {}
    fn on_run_failed(&self, _id: &RunId, _message: &str, _stack_trace: &str) {}
    fn on_status(&self, _id: &RunId, _message: &str) {}
    fn on_progress(&self, _id: &RunId, _progress: f32) {}
    fn on_client_exiting(&self) {}
    /// The link closed. `error` is set when it closed abnormally.
    fn on_disconnected(&self, _error: Option<&Error>) {}
}

pub struct NoopEvents;

impl HostEvents for NoopEvents {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Sent, nothing heard back yet.
    Submitted,
    Running,
    Completed,
    ValidationFailed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::ValidationFailed | Self::Failed)
    }
}

/// What the host knows about one submitted run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: RunId,
    pub start_path: String,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub progress: Option<f32>,
    pub status: RunStatus,
    pub error: Option<String>,
}

impl RunRecord {
    fn new(id: RunId, start_path: String) -> Self {
        Self {
            id,
            start_path,
            submitted_at: Utc::now(),
            finished_at: None,
            last_status: None,
            progress: None,
            status: RunStatus::Submitted,
            error: None,
        }
    }

    fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

/// Run table plus the signal raised whenever a run finishes or the link ends.
#[derive(Default)]
struct RunTable {
    runs: DashMap<RunId, RunRecord>,
    changed: Notify,
    closed: AtomicBool,
}

impl RunTable {
    fn update(&self, id: &RunId, f: impl FnOnce(&mut RunRecord)) {
        match self.runs.get_mut(id) {
            Some(mut record) => f(record.value_mut()),
            None => debug!(run_id = %id, "message for a run this host did not submit"),
        }
    }
}

pub struct Host {
    bus: Bus<Result<()>>,
    table: Arc<RunTable>,
}

impl Host {
    /// Drive a client already connected through `stream`.
    pub fn connect(stream: Duplex, events: Arc<dyn HostEvents>, config: BusConfig) -> Self {
        let table = Arc::new(RunTable::default());
        let loop_table = table.clone();
        let bus = Bus::spawn(stream, config, move |reader, _writer, cancel| {
            host_loop(reader, cancel, events, loop_table)
        });
        Self { bus, table }
    }

    /// Start a client process and drive it over its stdio. The host owns the
    /// process from here on.
    pub fn launch(
        launcher: &dyn ProcessLauncher,
        events: Arc<dyn HostEvents>,
        config: BusConfig,
    ) -> Result<Self> {
        let launched = launcher.launch()?;
        let host = Self::connect(launched.stream, events, config);
        if let Some(child) = launched.child {
            host.bus.attach_child(child);
        }
        Ok(host)
    }

    fn writer(&self) -> &MessageWriter {
        self.bus.writer()
    }

    pub async fn run_model_system(&self, request: RunRequest) -> Result<()> {
        let id = request.id.clone();
        self.table
            .runs
            .insert(id.clone(), RunRecord::new(id.clone(), request.start_path.clone()));
        info!(run_id = %id, start = %request.start_path, "submitting run");
        if let Err(e) = self
            .writer()
            .send_inbound(&InboundCommand::RunModelSystem(request))
            .await
        {
            self.table.runs.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Submit a run under a freshly generated id.
    pub async fn submit(
        &self,
        model_system: Bytes,
        cwd: &Path,
        start_path: impl Into<String>,
    ) -> Result<RunId> {
        let id = RunId::generate();
        self.run_model_system(RunRequest {
            id: id.clone(),
            cwd: cwd.to_string_lossy().into_owned(),
            start_path: start_path.into(),
            model_system,
        })
        .await?;
        Ok(id)
    }

    pub async fn cancel_run(&self, id: &RunId) -> Result<()> {
        self.writer()
            .send_inbound(&InboundCommand::CancelRun { run_id: id.clone() })
            .await
    }

    pub async fn kill_run(&self, id: &RunId) -> Result<()> {
        self.writer()
            .send_inbound(&InboundCommand::KillRun { run_id: id.clone() })
            .await
    }

    /// Ask the client to exit once its current run is done.
    pub async fn request_exit(&self) -> Result<()> {
        self.writer().send_inbound(&InboundCommand::ClientExiting).await
    }

    pub fn run(&self, id: &RunId) -> Option<RunRecord> {
        self.table.runs.get(id).map(|r| r.clone())
    }

    /// Every run this host has submitted, oldest first.
    pub fn runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.table.runs.iter().map(|r| r.clone()).collect();
        runs.sort_by_key(|r| r.submitted_at);
        runs
    }

    /// Drop the record of `id`, returning it.
    pub fn forget(&self, id: &RunId) -> Option<RunRecord> {
        self.table.runs.remove(id).map(|(_, record)| record)
    }

    /// Drop every finished run's record. Returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let before = self.table.runs.len();
        self.table.runs.retain(|_, record| !record.status.is_terminal());
        before - self.table.runs.len()
    }

    /// Wait until `id` reaches a terminal state. Returns `None` if the link
    /// ends first or the run was never submitted here.
    pub async fn wait_for_run(&self, id: &RunId) -> Option<RunRecord> {
        loop {
            let changed = self.table.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let record = self.run(id)?;
            if record.status.is_terminal() {
                return Some(record);
            }
            if self.table.closed.load(Ordering::SeqCst) {
                return None;
            }
            changed.await;
        }
    }

    /// Wait for the client to close the link.
    pub async fn wait(&self) -> Result<()> {
        self.bus.join().await?
    }

    pub async fn dispose(&self) {
        self.bus.dispose().await;
    }
}

async fn host_loop(
    mut reader: BoxReader,
    cancel: CancellationToken,
    events: Arc<dyn HostEvents>,
    table: Arc<RunTable>,
) -> Result<()> {
    info!("Host started");
    let result = loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            read = OutboundCommand::read(&mut reader) => read,
        };
        match command {
            Ok(Some(OutboundCommand::ClientExiting)) => {
                info!("client exiting");
                events.on_client_exiting();
                break Ok(());
            }
            Ok(Some(command)) => dispatch(command, events.as_ref(), &table),
            Ok(None) => {
                info!("client closed the link");
                events.on_disconnected(None);
                break Ok(());
            }
            Err(e) if e.is_disconnect() => {
                warn!("client link dropped: {}", e);
                events.on_disconnected(Some(&e));
                break Ok(());
            }
            Err(e) => {
                error!("client link faulted: {}", e);
                events.on_disconnected(Some(&e));
                break Err(e);
            }
        }
    };
    table.closed.store(true, Ordering::SeqCst);
    table.changed.notify_waiters();
    info!("Host stopped");
    result
}

fn dispatch(command: OutboundCommand, events: &dyn HostEvents, table: &RunTable) {
    match command {
        OutboundCommand::ClientReady => {
            info!("client ready");
            events.on_client_ready();
        }
        OutboundCommand::Heartbeat { run_id } => {
            if let Some(id) = &run_id {
                table.update(id, |r| {
                    if r.status == RunStatus::Submitted {
                        r.status = RunStatus::Running;
                    }
                });
            }
            events.on_heartbeat(run_id.as_ref());
        }
        OutboundCommand::StatusUpdate { run_id, message } => {
            table.update(&run_id, |r| {
                r.status = RunStatus::Running;
                r.last_status = Some(message.clone());
            });
            events.on_status(&run_id, &message);
        }
        OutboundCommand::ProgressUpdate { run_id, progress } => {
            table.update(&run_id, |r| {
                r.status = RunStatus::Running;
                r.progress = Some(progress);
            });
            events.on_progress(&run_id, progress);
        }
        OutboundCommand::FinishedRun { run_id } => {
            info!(run_id = %run_id, "run finished");
            table.update(&run_id, |r| r.finish(RunStatus::Completed, None));
            table.changed.notify_waiters();
            events.on_run_finished(&run_id);
        }
        OutboundCommand::RunValidationError { run_id, message } => {
            warn!(run_id = %run_id, "run failed validation: {}", message);
            table.update(&run_id, |r| {
                r.finish(RunStatus::ValidationFailed, Some(message.clone()))
            });
            table.changed.notify_waiters();
            events.on_validation_error(&run_id, &message);
        }
        OutboundCommand::RunFailed {
            run_id,
            message,
            stack_trace,
        } => {
            warn!(run_id = %run_id, "run failed: {}", message);
            table.update(&run_id, |r| r.finish(RunStatus::Failed, Some(message.clone())));
            table.changed.notify_waiters();
            events.on_run_failed(&run_id, &message, &stack_trace);
        }
        OutboundCommand::ClientExiting => events.on_client_exiting(),
    }
}
