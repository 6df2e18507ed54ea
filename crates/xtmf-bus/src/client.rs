//! Client: the worker side of the host/client link
//!
//! A client queues every run it receives on its [`Scheduler`] and forwards
//! whatever the runs report back to the host. While alive it announces
//! itself with `ClientReady`, beats at the configured interval and says
//! `ClientExiting` on the way out.

use crate::bus::Bus;
use crate::stream::{forward_outbound, BoxReader, Duplex, MessageWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xtmf_core::{InboundCommand, OutboundCommand, Result, XtmfConfig};
use xtmf_model::XtmfRuntime;
use xtmf_run::{RunContext, RunEvents, RunExecutor, Scheduler};

/// Why a client stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The host asked the client to exit.
    Requested,
    /// The link closed.
    Disconnected,
    /// The client was disposed.
    Disposed,
}

pub struct Client {
    bus: Bus<Result<ClientExit>>,
}

impl Client {
    pub fn start(
        stream: Duplex,
        executor: Arc<dyn RunExecutor>,
        runtime: Arc<XtmfRuntime>,
        config: &XtmfConfig,
    ) -> Self {
        let heartbeat = config.client.heartbeat_interval();
        let bus = Bus::spawn(stream, config.bus.clone(), move |reader, writer, cancel| {
            client_loop(reader, writer, cancel, executor, runtime, heartbeat)
        });
        Self { bus }
    }

    /// Wait for the client to stop on its own.
    pub async fn wait(&self) -> Result<ClientExit> {
        self.bus.join().await?
    }

    pub async fn dispose(&self) {
        self.bus.dispose().await;
    }
}

async fn client_loop(
    mut reader: BoxReader,
    writer: MessageWriter,
    cancel: CancellationToken,
    executor: Arc<dyn RunExecutor>,
    runtime: Arc<XtmfRuntime>,
    heartbeat: Option<Duration>,
) -> Result<ClientExit> {
    info!("Client started");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let forwarder = tokio::spawn(forward_outbound(events_rx, writer));
    let scheduler = Arc::new(Scheduler::new(executor.clone(), events_tx.clone()));
    let _ = events_tx.send(OutboundCommand::ClientReady);

    let beat_stop = CancellationToken::new();
    let beats = heartbeat.map(|period| {
        tokio::spawn(heartbeat_loop(
            period,
            scheduler.clone(),
            events_tx.clone(),
            beat_stop.clone(),
        ))
    });

    let exit = loop {
        let command = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(ClientExit::Disposed),
            read = InboundCommand::read(&mut reader) => read,
        };
        match command {
            Ok(Some(InboundCommand::RunModelSystem(request))) => {
                info!(run_id = %request.id, start = %request.start_path, "run received");
                scheduler.run(RunContext::from_request(request, runtime.clone()));
            }
            Ok(Some(InboundCommand::CancelRun { run_id })) => {
                if !scheduler.cancel(&run_id) {
                    debug!(run_id = %run_id, "cancel for a run that is not queued");
                }
            }
            Ok(Some(InboundCommand::KillRun { run_id })) => {
                if scheduler.cancel(&run_id) {
                    continue;
                }
                if scheduler.current_run().as_ref() == Some(&run_id) {
                    if !executor.kill(&run_id).await {
                        warn!(run_id = %run_id, "executor cannot kill a running run");
                    }
                } else {
                    debug!(run_id = %run_id, "kill for an unknown run");
                }
            }
            Ok(Some(InboundCommand::ClientExiting)) => {
                info!("host requested exit");
                break Ok(ClientExit::Requested);
            }
            Ok(None) => break Ok(ClientExit::Disconnected),
            Err(e) if e.is_disconnect() => break Ok(ClientExit::Disconnected),
            Err(e) => {
                error!("Client link faulted: {}", e);
                break Err(e);
            }
        }
    };

    beat_stop.cancel();
    if let Some(beats) = beats {
        let _ = beats.await;
    }
    let abandoned = scheduler.pending();
    if abandoned > 0 {
        warn!("{} queued runs abandoned on exit", abandoned);
    }
    scheduler.shutdown().await;
    drop(scheduler);

    let _ = events_tx.send(OutboundCommand::ClientExiting);
    drop(events_tx);
    let _ = forwarder.await;
    info!("Client stopped: {:?}", exit);
    exit
}

async fn heartbeat_loop(
    period: Duration,
    scheduler: Arc<Scheduler>,
    events: RunEvents,
    stop: CancellationToken,
) {
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticks.tick() => {
                let run_id = scheduler.current_run();
                if events.send(OutboundCommand::Heartbeat { run_id }).is_err() {
                    break;
                }
            }
        }
    }
}
