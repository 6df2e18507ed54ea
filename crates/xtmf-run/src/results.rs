//! RunResults: the outcome record persisted in a run's working directory

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xtmf_core::{Result, RUN_RESULTS_FILE};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunResults {
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_module_name: Option<String>,
}

impl RunResults {
    pub fn completed() -> Self {
        Self {
            completed: true,
            ..Default::default()
        }
    }

    /// Record for a run that failed structural or runtime validation.
    pub fn validation_error(message: impl Into<String>, module: Option<String>) -> Self {
        Self {
            completed: false,
            error_message: Some(message.into()),
            error_stack_trace: None,
            error_module_name: module,
        }
    }

    /// Record for a run whose modules raised an error while executing.
    pub fn runtime_error(
        message: impl Into<String>,
        stack_trace: impl Into<String>,
        module: Option<String>,
    ) -> Self {
        Self {
            completed: false,
            error_message: Some(message.into()),
            error_stack_trace: Some(stack_trace.into()),
            error_module_name: module,
        }
    }

    /// Any error field makes the run erroneous, whatever `completed` says.
    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
            || self.error_stack_trace.is_some()
            || self.error_module_name.is_some()
    }

    pub fn path(directory: &Path) -> PathBuf {
        directory.join(RUN_RESULTS_FILE)
    }

    /// Read the record from `directory`. `None` when the run left no record.
    pub fn load(directory: &Path) -> Result<Option<Self>> {
        let path = Self::path(directory);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, directory: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(directory), json)?;
        Ok(())
    }
}
