//! The Module trait: what every live node of a model system implements
//!
//! A module is constructed by its registry factory, receives its parameter and
//! hook bindings during wiring, and is then only accessed through `&self`.
//! Modules that keep mutable state during a run use their own interior
//! mutability.

use std::sync::Arc;

pub trait Module: Send + Sync + 'static {
    /// Pre-execution check run on every live module before the start node is
    /// invoked. `Err` carries the message reported to the requester.
    fn runtime_validation(&self) -> Result<(), String> {
        Ok(())
    }

    /// Execute the module as an action.
    fn invoke(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("module is not an action"))
    }
}

/// Shared handle to a live module instance.
pub type ModuleRef = Arc<dyn Module>;

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked".to_string()
    }
}
