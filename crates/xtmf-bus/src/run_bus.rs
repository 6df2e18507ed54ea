//! RunBus: the run process's side of the client link
//!
//! A run process executes at most one run. The bus keeps reading while the
//! run executes, so `KillRun` can end the process at any time. `CancelRun`
//! for the executing run and `ClientExiting` stop the reading and take
//! effect once no run is executing.

use crate::bus::Bus;
use crate::stream::{forward_outbound, BoxReader, Duplex, MessageWriter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xtmf_core::{BusConfig, InboundCommand, OutboundCommand, Result, RunId};
use xtmf_model::XtmfRuntime;
use xtmf_run::{panic_message, InProcessExecutor, RunContext, RunExecutor};

/// Why a run bus stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusExit {
    /// The client asked the process to exit.
    Requested,
    /// The client killed the run; the process should exit at once.
    Killed,
    /// The link closed.
    Disconnected,
    /// The bus was disposed.
    Disposed,
}

pub struct RunBus {
    bus: Bus<Result<BusExit>>,
    active: Arc<OnceLock<RunId>>,
}

impl RunBus {
    pub fn start(stream: Duplex, runtime: Arc<XtmfRuntime>, config: BusConfig) -> Self {
        let active = Arc::new(OnceLock::new());
        let loop_active = active.clone();
        let bus = Bus::spawn(stream, config, move |reader, writer, cancel| {
            run_bus_loop(reader, writer, cancel, runtime, loop_active)
        });
        Self { bus, active }
    }

    /// The run this process was asked to execute, once it has been.
    pub fn active_run(&self) -> Option<RunId> {
        self.active.get().cloned()
    }

    /// Wait for the bus to stop on its own.
    pub async fn wait(&self) -> Result<BusExit> {
        self.bus.join().await?
    }

    pub async fn dispose(&self) {
        self.bus.dispose().await;
    }
}

async fn run_bus_loop(
    reader: BoxReader,
    writer: MessageWriter,
    cancel: CancellationToken,
    runtime: Arc<XtmfRuntime>,
    active: Arc<OnceLock<RunId>>,
) -> Result<BusExit> {
    info!("RunBus started");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let forwarder = tokio::spawn(forward_outbound(events_rx, writer.clone()));
    let run_done = CancellationToken::new();
    let mut running = false;
    let mut exit_requested = false;

    let mut pending = read_next(reader);

    let exit = loop {
        if exit_requested && !running {
            break Ok(BusExit::Requested);
        }
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(BusExit::Disposed),
            _ = run_done.cancelled(), if running => {
                running = false;
                continue;
            }
            (reader, read) = &mut pending, if !exit_requested => {
                pending = read_next(reader);
                read
            }
        };
        match command {
            Ok(Some(InboundCommand::RunModelSystem(request))) => {
                let id = request.id.clone();
                if active.set(id.clone()).is_err() {
                    warn!(run_id = %id, "run process already executed a run; rejecting");
                    let _ = events_tx.send(OutboundCommand::RunFailed {
                        run_id: id,
                        message: "run process already executed a run".into(),
                        stack_trace: String::new(),
                    });
                    continue;
                }
                info!(run_id = %id, start = %request.start_path, "run received");
                running = true;
                let context = RunContext::from_request(request, runtime.clone());
                let events = events_tx.clone();
                let done = run_done.clone();
                tokio::spawn(async move {
                    let run_events = events.clone();
                    let result = tokio::spawn(async move {
                        InProcessExecutor.execute(context, run_events).await
                    })
                    .await;
                    let failure = match result {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(e) if e.is_panic() => Some(panic_message(e.into_panic().as_ref())),
                        Err(e) => Some(e.to_string()),
                    };
                    if let Some(message) = failure {
                        error!(run_id = %id, "run execution failed: {}", message);
                        let _ = events.send(OutboundCommand::RunFailed {
                            run_id: id,
                            message,
                            stack_trace: String::new(),
                        });
                    }
                    done.cancel();
                });
            }
            Ok(Some(InboundCommand::CancelRun { run_id })) => {
                if active.get() == Some(&run_id) {
                    debug!(run_id = %run_id, "cancel requested");
                    exit_requested = true;
                } else {
                    debug!(run_id = %run_id, "cancel for a run this process is not executing");
                }
            }
            Ok(Some(InboundCommand::KillRun { run_id })) => {
                info!(run_id = %run_id, "kill requested");
                break Ok(BusExit::Killed);
            }
            Ok(Some(InboundCommand::ClientExiting)) => exit_requested = true,
            Ok(None) => break Ok(BusExit::Disconnected),
            Err(e) if e.is_disconnect() => break Ok(BusExit::Disconnected),
            Err(e) => {
                error!("RunBus link faulted: {}", e);
                break Err(e);
            }
        }
    };

    if matches!(exit, Ok(BusExit::Requested)) {
        let _ = events_tx.send(OutboundCommand::ClientExiting);
        drop(events_tx);
        // Every sender is gone once the run finished, so this drains and ends.
        let _ = forwarder.await;
    } else {
        forwarder.abort();
    }
    info!("RunBus stopped: {:?}", exit);
    exit
}

type ReadOutput = (BoxReader, Result<Option<InboundCommand>>);
type PendingRead = Pin<Box<dyn Future<Output = ReadOutput> + Send>>;

/// One read that owns the reader. It stays alive across `select!` passes, so
/// a message is never split between two reads.
fn read_next(mut reader: BoxReader) -> PendingRead {
    Box::pin(async move {
        let read = InboundCommand::read(&mut reader).await;
        (reader, read)
    })
}
