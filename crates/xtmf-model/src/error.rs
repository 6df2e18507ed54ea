//! Errors raised while loading, wiring and validating a model system

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("unable to load model system: {0}")]
    Load(String),

    #[error("unknown module type '{type_name}' for structure '{structure}'")]
    UnknownModuleType { structure: String, type_name: String },

    #[error("module '{structure}' has no hook named '{hook}'")]
    UnknownHook { structure: String, hook: String },

    #[error("module '{structure}' requires a link for hook '{hook}'")]
    MissingRequiredHook { structure: String, hook: String },

    #[error("module '{structure}' hook '{hook}' is linked to disabled module '{destination}'")]
    DisabledRequiredDestination {
        structure: String,
        hook: String,
        destination: String,
    },

    #[error("hook '{hook}' on module '{structure}' was already bound")]
    HookAlreadyBound { structure: String, hook: String },

    #[error("invalid parameter for '{structure}': {reason}")]
    Parameter { structure: String, reason: String },

    #[error("unable to find a child boundary named '{name}' in parent boundary '{parent}'")]
    BoundaryNotFound { name: String, parent: String },

    #[error("unable to find a start named '{name}' in boundary '{boundary}'")]
    StartNotFound { name: String, boundary: String },

    #[error("{message}")]
    RuntimeValidation { module: String, message: String },
}

impl ModelError {
    pub fn load(message: impl Into<String>) -> Self {
        Self::Load(message.into())
    }

    /// Name of the module the error is about, when there is one.
    pub fn module_name(&self) -> Option<&str> {
        match self {
            Self::UnknownModuleType { structure, .. }
            | Self::UnknownHook { structure, .. }
            | Self::MissingRequiredHook { structure, .. }
            | Self::DisabledRequiredDestination { structure, .. }
            | Self::HookAlreadyBound { structure, .. }
            | Self::Parameter { structure, .. } => Some(structure),
            Self::RuntimeValidation { module, .. } => Some(module),
            Self::Load(_) | Self::BoundaryNotFound { .. } | Self::StartNotFound { .. } => None,
        }
    }
}

/// Error raised by a running module. Carries the module's name so a run
/// failure can be attributed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ModuleError {
    pub module: String,
    pub message: String,
}

impl ModuleError {
    pub fn new(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            message: message.into(),
        }
    }
}
