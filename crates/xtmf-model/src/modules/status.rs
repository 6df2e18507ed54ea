//! StatusMessage and Progress: report through the runtime's run reporter

use crate::module::Module;
use crate::registry::ModuleDescriptor;
use crate::runtime::XtmfRuntime;
use std::sync::Arc;

pub const STATUS_MESSAGE_TYPE: &str = "XTMF2.RuntimeModules.StatusMessage";
pub const PROGRESS_TYPE: &str = "XTMF2.RuntimeModules.Progress";

pub struct StatusMessage {
    runtime: Arc<XtmfRuntime>,
    message: String,
}

impl Module for StatusMessage {
    fn invoke(&self) -> anyhow::Result<()> {
        tracing::debug!(message = %self.message, "status message");
        self.runtime.report_status(&self.message);
        Ok(())
    }
}

pub struct Progress {
    runtime: Arc<XtmfRuntime>,
    progress: f32,
}

impl Module for Progress {
    fn runtime_validation(&self) -> Result<(), String> {
        if (0.0..=1.0).contains(&self.progress) {
            Ok(())
        } else {
            Err(format!(
                "progress must be between 0 and 1, found {}",
                self.progress
            ))
        }
    }

    fn invoke(&self) -> anyhow::Result<()> {
        self.runtime.report_progress(self.progress);
        Ok(())
    }
}

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::builder(STATUS_MESSAGE_TYPE, |ctx| StatusMessage {
        runtime: ctx.runtime.clone(),
        message: String::new(),
    })
    .parameter::<String>(|m, message| m.message = message)
    .build()
}

pub fn progress_descriptor() -> ModuleDescriptor {
    ModuleDescriptor::builder(PROGRESS_TYPE, |ctx| Progress {
        runtime: ctx.runtime.clone(),
        progress: 0.0,
    })
    .parameter::<f32>(|m, progress| m.progress = progress)
    .build()
}
