//! Run executors: where a dequeued run actually executes

use crate::run::{Run, RunContext};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use xtmf_core::{OutboundCommand, RunId};
use xtmf_model::RunReporter;

/// Outlet for every message a run produces, in order.
pub type RunEvents = mpsc::UnboundedSender<OutboundCommand>;

/// Executes one run to completion and reports its messages through `events`.
///
/// Exactly one terminal message is expected per run. An `Err` means the
/// executor itself failed; the caller reports it as a run failure.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    async fn execute(&self, context: RunContext, events: RunEvents) -> anyhow::Result<()>;

    /// End the executing run `id`, when the executor can. Returns whether a
    /// kill was issued.
    async fn kill(&self, _id: &RunId) -> bool {
        false
    }
}

/// Forwards module status and progress reports as wire messages.
pub struct ChannelReporter {
    run_id: RunId,
    events: RunEvents,
}

impl ChannelReporter {
    pub fn new(run_id: RunId, events: RunEvents) -> Self {
        Self { run_id, events }
    }
}

impl RunReporter for ChannelReporter {
    fn status(&self, message: &str) {
        let _ = self.events.send(OutboundCommand::StatusUpdate {
            run_id: self.run_id.clone(),
            message: message.to_string(),
        });
    }

    fn progress(&self, progress: f32) {
        let _ = self.events.send(OutboundCommand::ProgressUpdate {
            run_id: self.run_id.clone(),
            progress,
        });
    }
}

/// Runs the model system on a blocking thread of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessExecutor;

#[async_trait]
impl RunExecutor for InProcessExecutor {
    async fn execute(&self, context: RunContext, events: RunEvents) -> anyhow::Result<()> {
        let run_id = context.id().clone();
        let reporter = Arc::new(ChannelReporter::new(run_id.clone(), events.clone()));
        let outcome = tokio::task::spawn_blocking(move || {
            Run::new(context).with_reporter(reporter).execute()
        })
        .await?;
        let _ = events.send(outcome.to_command(&run_id));
        Ok(())
    }
}
