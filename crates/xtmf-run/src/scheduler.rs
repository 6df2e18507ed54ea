//! Scheduler: serial run execution inside a client
//!
//! Runs enter a single unbounded queue and one worker task drains it,
//! executing exactly one run at a time in arrival order. The worker waits on
//! the queue and the scheduler's cancellation token, whichever fires first,
//! so shutdown is observed only between runs.

use crate::executor::{RunEvents, RunExecutor};
use crate::run::{panic_message, RunContext};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use xtmf_core::{OutboundCommand, RunId};

#[derive(Default)]
struct QueueState {
    current: Option<RunId>,
    pending: HashSet<RunId>,
    cancelled: HashSet<RunId>,
}

pub struct Scheduler {
    queue_tx: mpsc::UnboundedSender<RunContext>,
    state: Arc<Mutex<QueueState>>,
    cancel: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the worker loop. Must be called from within a tokio runtime.
    pub fn new(executor: Arc<dyn RunExecutor>, events: RunEvents) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(QueueState::default()));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(worker_loop(
            queue_rx,
            executor,
            events,
            state.clone(),
            cancel.clone(),
        ));
        Self {
            queue_tx,
            state,
            cancel,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Queue a run. Never blocks.
    pub fn run(&self, context: RunContext) {
        let id = context.id().clone();
        self.lock_state().pending.insert(id.clone());
        if self.queue_tx.send(context).is_err() {
            self.lock_state().pending.remove(&id);
            error!(run_id = %id, "scheduler is shut down; run dropped");
            return;
        }
        debug!(run_id = %id, "run queued");
    }

    /// Skip a queued run when it is dequeued. Returns whether it was queued.
    ///
    /// A run that is already executing is not interrupted.
    pub fn cancel(&self, id: &RunId) -> bool {
        let mut state = self.lock_state();
        if state.pending.contains(id) {
            state.cancelled.insert(id.clone());
            info!(run_id = %id, "queued run cancelled");
            true
        } else {
            false
        }
    }

    /// The run being executed, if any.
    pub fn current_run(&self) -> Option<RunId> {
        self.lock_state().current.clone()
    }

    /// Number of queued runs not yet started.
    pub fn pending(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Stop the worker after its current run and wait for it. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("scheduler worker ended abnormally: {}", e);
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        lock(&self.state)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock(state: &Mutex<QueueState>) -> std::sync::MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn worker_loop(
    mut queue_rx: mpsc::UnboundedReceiver<RunContext>,
    executor: Arc<dyn RunExecutor>,
    events: RunEvents,
    state: Arc<Mutex<QueueState>>,
    cancel: CancellationToken,
) {
    info!("Scheduler started");
    loop {
        let context = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue_rx.recv() => match next {
                Some(context) => context,
                None => break,
            },
        };

        let id = context.id().clone();
        {
            let mut state = lock(&state);
            state.pending.remove(&id);
            if state.cancelled.remove(&id) {
                debug!(run_id = %id, "skipping cancelled run");
                continue;
            }
            state.current = Some(id.clone());
        }
        info!(run_id = %id, "run dequeued");

        let task = {
            let executor = executor.clone();
            let events = events.clone();
            tokio::spawn(async move { executor.execute(context, events).await })
        };
        let failure = match task.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some((e.to_string(), format!("{:?}", e))),
            Err(e) if e.is_panic() => Some((panic_message(e.into_panic().as_ref()), String::new())),
            Err(e) => Some((e.to_string(), String::new())),
        };
        if let Some((message, stack_trace)) = failure {
            error!(run_id = %id, "run execution failed: {}", message);
            let _ = events.send(OutboundCommand::RunFailed {
                run_id: id.clone(),
                message,
                stack_trace,
            });
        }

        lock(&state).current = None;
    }
    info!("Scheduler stopped");
}
