//! Run lifecycle
//!
//! A run validates its model system, runs every module's runtime validation,
//! then invokes the resolved start node with the process working directory
//! set to the run's directory. Exactly one [`RunOutcome`] is produced and
//! persisted as [`RunResults`].

use crate::cwd::WorkingDirectory;
use crate::results::RunResults;
use bytes::Bytes;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use xtmf_core::{OutboundCommand, RunId, RunRequest};
use xtmf_model::{
    format, LiveModelSystem, ModelError, ModuleError, NullReporter, RunReporter, XtmfRuntime,
};

pub use xtmf_model::panic_message;

/// Immutable description of one job.
#[derive(Clone)]
pub struct RunContext {
    id: RunId,
    model_system: Bytes,
    working_directory: PathBuf,
    start_path: String,
    runtime: Arc<XtmfRuntime>,
}

impl RunContext {
    pub fn new(
        id: RunId,
        model_system: Bytes,
        working_directory: impl Into<PathBuf>,
        start_path: impl Into<String>,
        runtime: Arc<XtmfRuntime>,
    ) -> Self {
        Self {
            id,
            model_system,
            working_directory: working_directory.into(),
            start_path: start_path.into(),
            runtime,
        }
    }

    pub fn from_request(request: RunRequest, runtime: Arc<XtmfRuntime>) -> Self {
        Self::new(
            request.id,
            request.model_system,
            request.cwd,
            request.start_path,
            runtime,
        )
    }

    /// The wire request that reproduces this context in another process.
    pub fn to_request(&self) -> RunRequest {
        RunRequest {
            id: self.id.clone(),
            cwd: self.working_directory.to_string_lossy().into_owned(),
            start_path: self.start_path.clone(),
            model_system: self.model_system.clone(),
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn model_system(&self) -> &Bytes {
        &self.model_system
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn start_path(&self) -> &str {
        &self.start_path
    }

    pub fn runtime(&self) -> &Arc<XtmfRuntime> {
        &self.runtime
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("id", &self.id)
            .field("working_directory", &self.working_directory)
            .field("start_path", &self.start_path)
            .field("model_system_len", &self.model_system.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Validated,
    RuntimeValidated,
    Executing,
    Completed,
    ValidationFailed,
    RuntimeValidationFailed,
    RuntimeFailed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::ValidationFailed
                | Self::RuntimeValidationFailed
                | Self::RuntimeFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// No module code ran, or a module rejected its own preconditions.
    ValidationError {
        message: String,
        module: Option<String>,
    },
    /// An error or panic escaped a running module.
    RuntimeError {
        message: String,
        stack: String,
        module: Option<String>,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn to_results(&self) -> RunResults {
        match self {
            Self::Completed => RunResults::completed(),
            Self::ValidationError { message, module } => {
                RunResults::validation_error(message.clone(), module.clone())
            }
            Self::RuntimeError {
                message,
                stack,
                module,
            } => RunResults::runtime_error(message.clone(), stack.clone(), module.clone()),
        }
    }

    /// The terminal wire message reporting this outcome.
    pub fn to_command(&self, run_id: &RunId) -> OutboundCommand {
        let run_id = run_id.clone();
        match self {
            Self::Completed => OutboundCommand::FinishedRun { run_id },
            Self::ValidationError { message, .. } => OutboundCommand::RunValidationError {
                run_id,
                message: message.clone(),
            },
            Self::RuntimeError { message, stack, .. } => OutboundCommand::RunFailed {
                run_id,
                message: message.clone(),
                stack_trace: stack.clone(),
            },
        }
    }

    fn validation(error: ModelError) -> Self {
        Self::ValidationError {
            module: error.module_name().map(str::to_string),
            message: error.to_string(),
        }
    }

    /// Classify an error escaping module code by its innermost cause.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let module = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<ModuleError>())
            .map(|e| e.module.clone());
        Self::RuntimeError {
            message: error.root_cause().to_string(),
            stack: format!("{:?}", error),
            module,
        }
    }

    fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::RuntimeError {
            message: panic_message(payload.as_ref()),
            stack: String::new(),
            module: None,
        }
    }
}

pub struct Run {
    context: RunContext,
    reporter: Arc<dyn RunReporter>,
    state: RunState,
}

impl Run {
    pub fn new(context: RunContext) -> Self {
        Self {
            context,
            reporter: Arc::new(NullReporter),
            state: RunState::Created,
        }
    }

    /// Route the run's status and progress reports to `reporter`.
    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn id(&self) -> &RunId {
        self.context.id()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drive the run to a terminal state and persist its outcome.
    ///
    /// Blocks for as long as the model system executes, so callers on an
    /// async runtime use a blocking thread.
    pub fn execute(&mut self) -> RunOutcome {
        let run_id = self.context.id.clone();
        info!(run_id = %run_id, start = %self.context.start_path, "run started");

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.drive())) {
            Ok(outcome) => outcome,
            Err(payload) => self.panicked(payload),
        };
        self.state = match &outcome {
            RunOutcome::Completed => RunState::Completed,
            RunOutcome::ValidationError { .. } if self.state == RunState::Validated => {
                RunState::RuntimeValidationFailed
            }
            RunOutcome::ValidationError { .. } => RunState::ValidationFailed,
            RunOutcome::RuntimeError { .. } => RunState::RuntimeFailed,
        };

        if let Err(e) = outcome.to_results().save(&self.context.working_directory) {
            warn!(run_id = %run_id, "failed to write run results: {}", e);
        }
        match &outcome {
            RunOutcome::Completed => info!(run_id = %run_id, "run completed"),
            RunOutcome::ValidationError { message, module } => {
                warn!(run_id = %run_id, module = ?module, "run failed validation: {}", message)
            }
            RunOutcome::RuntimeError { message, module, .. } => {
                warn!(run_id = %run_id, module = ?module, "run failed: {}", message)
            }
        }
        outcome
    }

    fn drive(&mut self) -> RunOutcome {
        let live = match self.validate() {
            Ok(live) => live,
            Err(outcome) => return outcome,
        };
        self.state = RunState::Validated;
        debug!(run_id = %self.context.id, "validated");

        if let Err(e) = live.runtime_validate() {
            return RunOutcome::validation(e);
        }
        self.state = RunState::RuntimeValidated;
        debug!(run_id = %self.context.id, "runtime validated");

        self.state = RunState::Executing;
        self.invoke(&live)
    }

    /// Outcome for a panic that escaped `drive`, judged by how far the run got.
    fn panicked(&self, payload: Box<dyn std::any::Any + Send>) -> RunOutcome {
        match self.state {
            RunState::Created | RunState::Validated => RunOutcome::ValidationError {
                message: format!(
                    "run panicked before execution: {}",
                    panic_message(payload.as_ref())
                ),
                module: None,
            },
            _ => RunOutcome::from_panic(payload),
        }
    }

    fn validate(&self) -> Result<LiveModelSystem, RunOutcome> {
        let directory = &self.context.working_directory;
        std::fs::create_dir_all(directory).map_err(|e| RunOutcome::ValidationError {
            message: format!(
                "unable to create working directory {}: {}",
                directory.display(),
                e
            ),
            module: None,
        })?;

        let model_system =
            format::load(&self.context.model_system).map_err(RunOutcome::validation)?;
        let runtime = Arc::new(
            self.context
                .runtime
                .as_ref()
                .clone()
                .with_reporter(self.reporter.clone()),
        );
        let live =
            LiveModelSystem::construct(model_system, &runtime).map_err(RunOutcome::validation)?;
        live.start(&self.context.start_path)
            .map_err(RunOutcome::validation)?;
        Ok(live)
    }

    fn invoke(&self, live: &LiveModelSystem) -> RunOutcome {
        let start = match live.start(&self.context.start_path) {
            Ok((_, start)) => start.clone(),
            Err(e) => return RunOutcome::validation(e),
        };
        let _cwd = match WorkingDirectory::enter(&self.context.working_directory) {
            Ok(guard) => guard,
            Err(e) => {
                let error = anyhow::Error::new(e).context(format!(
                    "unable to enter working directory {}",
                    self.context.working_directory.display()
                ));
                return RunOutcome::from_error(&error);
            }
        };
        match catch_unwind(AssertUnwindSafe(|| start.invoke())) {
            Ok(Ok(())) => RunOutcome::Completed,
            Ok(Err(e)) => RunOutcome::from_error(&e),
            Err(payload) => RunOutcome::from_panic(payload),
        }
    }
}
