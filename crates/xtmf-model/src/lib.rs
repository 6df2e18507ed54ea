//! XTMF model - model-system graph, module registry and wiring
//!
//! Module types register a descriptor in a [`ModuleRegistry`]. A serialized
//! model system is parsed by [`format`] into a [`ModelSystem`] graph, then
//! [`LiveModelSystem::construct`] instantiates and wires it.
//! To add a runtime module: create the file in src/modules/, register below.

pub mod construct;
pub mod error;
pub mod format;
pub mod graph;
pub mod hook;
pub mod module;
pub mod modules;
pub mod parameter;
pub mod registry;
pub mod runtime;

pub use construct::LiveModelSystem;
pub use error::{ModelError, ModuleError};
pub use graph::{
    Boundary, Link, LinkTarget, LinkTargets, ModelSystem, ModelSystemStructure, Point,
    StructureId, StructureKind,
};
pub use hook::{Binding, Cardinality, MultiHook, SingleHook};
pub use module::{panic_message, Module, ModuleRef};
pub use parameter::ParameterParser;
pub use registry::{HookDescriptor, LiveModule, ModuleBuilder, ModuleDescriptor, ModuleRegistry};
pub use runtime::{ModuleContext, NullReporter, RunReporter, XtmfRuntime};

/// Create the registry holding every built-in runtime module.
///
/// Edit this function to add or remove built-in modules.
pub fn default_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();

    // --- Control flow ---
    registry.register(modules::execute::descriptor());
    registry.register(modules::execute::parallel_descriptor());
    registry.register(modules::wait::descriptor());

    // --- Reporting ---
    registry.register(modules::status::descriptor());
    registry.register(modules::status::progress_descriptor());

    // --- Preconditions and failure ---
    registry.register(modules::require_directory::descriptor());
    registry.register(modules::fail::descriptor());

    registry
}
