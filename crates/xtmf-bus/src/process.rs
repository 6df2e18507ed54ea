//! Process launching and the per-run process executor

use crate::bus::reap;
use crate::stream::{BoxReader, Duplex, MessageWriter};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use xtmf_core::{
    BusConfig, Error, InboundCommand, Isolation, OutboundCommand, Result, RunId, XtmfConfig,
};
use xtmf_run::{InProcessExecutor, RunContext, RunEvents, RunExecutor};

/// Message reported when a run process ends without a terminal message.
pub const RUN_PROCESS_EXITED: &str = "run process exited before reporting a result";

/// A started peer process and the link to it.
pub struct LaunchedProcess {
    pub stream: Duplex,
    /// `None` for peers that are not OS processes (in-memory links).
    pub child: Option<Child>,
}

/// Starts the peer process at the far end of a link.
pub trait ProcessLauncher: Send + Sync + 'static {
    fn launch(&self) -> Result<LaunchedProcess>;
}

/// Launches an executable with piped stdin/stdout. The child's stderr is
/// inherited so its logs reach the parent's log stream.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Launch `program`, or the current executable when `None`.
    pub fn for_executable(program: Option<&PathBuf>, args: Vec<String>) -> Result<Self> {
        let program = match program {
            Some(p) => p.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program, args))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self) -> Result<LaunchedProcess> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::process(format!("failed to spawn {}: {}", self.program.display(), e))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::process("child stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process("child stdout was not captured"))?;
        info!(pid = ?child.id(), program = %self.program.display(), "process spawned");
        Ok(LaunchedProcess {
            stream: Duplex::new(stdout, stdin),
            child: Some(child),
        })
    }
}

/// Executes every run in a fresh run process.
pub struct ProcessExecutor {
    launcher: Arc<dyn ProcessLauncher>,
    config: BusConfig,
    active: Mutex<Option<(RunId, MessageWriter)>>,
}

impl ProcessExecutor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: BusConfig) -> Self {
        Self {
            launcher,
            config,
            active: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RunExecutor for ProcessExecutor {
    async fn execute(&self, context: RunContext, events: RunEvents) -> anyhow::Result<()> {
        let run_id = context.id().clone();
        let LaunchedProcess { stream, child } = self.launcher.launch()?;
        let (mut reader, writer) = stream.into_parts();
        let terminal = match writer
            .send_inbound(&InboundCommand::RunModelSystem(context.to_request()))
            .await
        {
            Ok(()) => {
                *self.active.lock().await = Some((run_id.clone(), writer.clone()));
                let terminal = relay(&mut reader, &events, &run_id).await;
                self.active.lock().await.take();
                terminal
            }
            Err(e) => {
                warn!(run_id = %run_id, "failed to send run to run process: {}", e);
                false
            }
        };

        if terminal {
            let _ = writer.send_inbound(&InboundCommand::ClientExiting).await;
        } else {
            warn!(run_id = %run_id, "{}", RUN_PROCESS_EXITED);
            let _ = events.send(OutboundCommand::RunFailed {
                run_id: run_id.clone(),
                message: RUN_PROCESS_EXITED.to_string(),
                stack_trace: String::new(),
            });
        }
        writer.shutdown().await;
        if let Some(child) = child {
            reap(child, &self.config).await;
        }
        debug!(run_id = %run_id, "run process finished");
        Ok(())
    }

    async fn kill(&self, id: &RunId) -> bool {
        let writer = match self.active.lock().await.as_ref() {
            Some((active, writer)) if active == id => writer.clone(),
            _ => return false,
        };
        info!(run_id = %id, "killing run process");
        writer
            .send_inbound(&InboundCommand::KillRun { run_id: id.clone() })
            .await
            .is_ok()
    }
}

/// Forward run messages until a terminal one. Returns whether it arrived.
async fn relay(reader: &mut BoxReader, events: &RunEvents, run_id: &RunId) -> bool {
    loop {
        match OutboundCommand::read(reader).await {
            Ok(Some(OutboundCommand::Heartbeat { .. } | OutboundCommand::ClientReady)) => {}
            Ok(Some(OutboundCommand::ClientExiting)) | Ok(None) => return false,
            Ok(Some(command)) => {
                let terminal = command.is_terminal();
                let _ = events.send(command);
                if terminal {
                    return true;
                }
            }
            Err(e) => {
                warn!(run_id = %run_id, "run process link failed: {}", e);
                return false;
            }
        }
    }
}

/// The executor a client uses under `config`.
pub fn executor_for(config: &XtmfConfig) -> Result<Arc<dyn RunExecutor>> {
    Ok(match config.client.isolation {
        Isolation::InProcess => Arc::new(InProcessExecutor),
        Isolation::Process => {
            let launcher = CommandLauncher::for_executable(
                config.client.run_executable.as_ref(),
                config.client.run_args.clone(),
            )?;
            Arc::new(ProcessExecutor::new(Arc::new(launcher), config.bus.clone()))
        }
    })
}
