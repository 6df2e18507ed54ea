//! Hooks: named connection points a module exposes for wiring

use crate::module::{Module, ModuleRef};
use std::sync::OnceLock;

/// How many destinations a hook accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    Single,
    AtLeastOne,
    AnyNumber,
}

impl Cardinality {
    /// Required hooks must resolve to at least one enabled destination.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Single | Self::AtLeastOne)
    }

    /// Whether the hook binds an ordered array rather than a single module.
    pub fn is_multi(self) -> bool {
        matches!(self, Self::AtLeastOne | Self::AnyNumber)
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Single => "Single",
            Self::AtLeastOne => "AtLeastOne",
            Self::AnyNumber => "AnyNumber",
        };
        f.write_str(s)
    }
}

/// What the wiring pass hands to a hook.
pub enum Binding {
    Single(ModuleRef),
    Multi(Vec<ModuleRef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindError {
    AlreadyBound,
    TooMany,
    /// The instance handed to the binder is not the descriptor's module type.
    TypeMismatch,
}

/// Field type for a hook bound to exactly one module.
#[derive(Default)]
pub struct SingleHook(OnceLock<ModuleRef>);

impl SingleHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&ModuleRef> {
        self.0.get()
    }

    pub fn is_bound(&self) -> bool {
        self.0.get().is_some()
    }

    /// Invoke the bound module as an action.
    pub fn invoke(&self) -> anyhow::Result<()> {
        match self.0.get() {
            Some(module) => module.invoke(),
            None => Err(anyhow::anyhow!("hook is not bound")),
        }
    }

    pub(crate) fn bind(&self, binding: Binding) -> Result<(), BindError> {
        let module = match binding {
            Binding::Single(module) => module,
            Binding::Multi(mut modules) if modules.len() == 1 => modules.remove(0),
            Binding::Multi(_) => return Err(BindError::TooMany),
        };
        self.0.set(module).map_err(|_| BindError::AlreadyBound)
    }
}

/// Field type for a hook bound to an ordered array of modules.
#[derive(Default)]
pub struct MultiHook(OnceLock<Vec<ModuleRef>>);

impl MultiHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound modules in link order; empty when nothing was linked.
    pub fn modules(&self) -> &[ModuleRef] {
        self.0.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.modules().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules().is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Module> {
        self.modules().iter().map(|m| m.as_ref())
    }

    pub(crate) fn bind(&self, binding: Binding) -> Result<(), BindError> {
        let modules = match binding {
            Binding::Single(module) => vec![module],
            Binding::Multi(modules) => modules,
        };
        self.0.set(modules).map_err(|_| BindError::AlreadyBound)
    }
}
