//! The runtime handle passed to every module factory

use crate::parameter::ParameterParser;
use crate::registry::ModuleRegistry;
use std::sync::Arc;

/// Sink for a running model system's status and progress reports.
///
/// Called from module code on the run's blocking thread.
pub trait RunReporter: Send + Sync {
    fn status(&self, message: &str);
    fn progress(&self, progress: f32);
}

/// Reporter that discards everything.
pub struct NullReporter;

impl RunReporter for NullReporter {
    fn status(&self, _message: &str) {}
    fn progress(&self, _progress: f32) {}
}

/// Explicit runtime context: module registry, parameter converters and the
/// reporter of the run being executed.
#[derive(Clone)]
pub struct XtmfRuntime {
    registry: Arc<ModuleRegistry>,
    parameters: Arc<ParameterParser>,
    reporter: Arc<dyn RunReporter>,
}

impl XtmfRuntime {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry,
            parameters: Arc::new(ParameterParser::default()),
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_parameters(mut self, parameters: Arc<ParameterParser>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn parameters(&self) -> &Arc<ParameterParser> {
        &self.parameters
    }

    pub fn report_status(&self, message: &str) {
        self.reporter.status(message);
    }

    pub fn report_progress(&self, progress: f32) {
        self.reporter.progress(progress);
    }
}

/// What a module factory receives: the owning runtime and the structure's name.
pub struct ModuleContext<'a> {
    pub runtime: &'a Arc<XtmfRuntime>,
    pub name: &'a str,
}
