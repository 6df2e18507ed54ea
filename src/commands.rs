//! The three process roles behind the `xtmf` subcommands

use anyhow::Context;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use xtmf_bus::{
    executor_for, BusExit, Client, ClientExit, CommandLauncher, Duplex, Host, HostEvents,
    ProcessLauncher, RunBus, RunRecord,
};
use xtmf_core::{Error, RunId, XtmfConfig};
use xtmf_model::{default_registry, format, XtmfRuntime};

/// Runtime with every built-in module registered.
pub fn runtime() -> Arc<XtmfRuntime> {
    Arc::new(XtmfRuntime::new(Arc::new(default_registry())))
}

/// Serve a host over `stream` until it asks the client to exit.
pub async fn run_client(config: &XtmfConfig, stream: Duplex) -> anyhow::Result<ClientExit> {
    let executor = executor_for(config)?;
    let client = Client::start(stream, executor, runtime(), config);
    let exit = client.wait().await;
    client.dispose().await;
    Ok(exit?)
}

/// Execute the single run a client sends over `stream`.
pub async fn run_process(config: &XtmfConfig, stream: Duplex) -> anyhow::Result<BusExit> {
    let bus = RunBus::start(stream, runtime(), config.bus.clone());
    let exit = bus.wait().await;
    bus.dispose().await;
    Ok(exit?)
}

/// Read a UTF-8 model system file and encode it for the wire.
pub fn read_model_system(path: &Path) -> anyhow::Result<Bytes> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    format::from_json(&text).with_context(|| format!("invalid model system {}", path.display()))?;
    Ok(Bytes::from(format::encode_utf16le(&text)))
}

/// Launcher for the client process a host submits to. An explicit config
/// file is passed down so the client sees the same settings.
pub fn client_launcher(
    config: &XtmfConfig,
    client_exe: Option<&PathBuf>,
    config_path: Option<&Path>,
) -> anyhow::Result<CommandLauncher> {
    let mut args = config.host.client_args.clone();
    if let Some(path) = config_path {
        args.push("--config".into());
        args.push(path.to_string_lossy().into_owned());
    }
    let exe = client_exe.or(config.host.client_executable.as_ref());
    Ok(CommandLauncher::for_executable(exe, args)?)
}

pub struct Submission {
    pub model_system: Bytes,
    pub cwd: PathBuf,
    pub start_path: String,
}

/// Launch a client, submit one run and wait for its result.
pub async fn submit(
    launcher: &dyn ProcessLauncher,
    submission: Submission,
    events: Arc<dyn HostEvents>,
    config: &XtmfConfig,
) -> anyhow::Result<RunRecord> {
    let host = Host::launch(launcher, events, config.bus.clone())?;
    let result = drive(&host, submission, config).await;
    host.dispose().await;
    result
}

async fn drive(
    host: &Host,
    submission: Submission,
    config: &XtmfConfig,
) -> anyhow::Result<RunRecord> {
    let id = host
        .submit(submission.model_system, &submission.cwd, submission.start_path)
        .await?;
    let record = host
        .wait_for_run(&id)
        .await
        .with_context(|| format!("client exited before run {} finished", id))?;

    if let Err(e) = host.request_exit().await {
        warn!("failed to ask the client to exit: {}", e);
    } else if tokio::time::timeout(config.bus.dispose_timeout(), host.wait())
        .await
        .is_err()
    {
        warn!("client did not exit in time");
    }
    Ok(record)
}

/// Prints run events for a person watching `xtmf submit`.
pub struct ConsoleEvents;

impl HostEvents for ConsoleEvents {
    fn on_client_ready(&self) {
        info!("client ready");
    }

    fn on_run_finished(&self, id: &RunId) {
        println!("[{}] finished", id);
    }

    fn on_validation_error(&self, id: &RunId, message: &str) {
        println!("[{}] validation error: {}", id, message);
    }

    fn on_run_failed(&self, id: &RunId, message: &str, stack_trace: &str) {
        println!("[{}] failed: {}", id, message);
        if !stack_trace.is_empty() {
            println!("{}", stack_trace);
        }
    }

    fn on_status(&self, id: &RunId, message: &str) {
        println!("[{}] {}", id, message);
    }

    fn on_progress(&self, id: &RunId, progress: f32) {
        println!("[{}] {:.0}%", id, progress * 100.0);
    }

    fn on_disconnected(&self, error: Option<&Error>) {
        if let Some(e) = error {
            warn!("client link failed: {}", e);
        }
    }
}
