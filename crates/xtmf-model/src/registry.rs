//! Module registry and descriptor definitions
//!
//! Each module type registers a descriptor: a factory, its hooks in
//! construction order, and optionally a typed parameter. Descriptors are built
//! once at registration time with [`ModuleDescriptor::builder`]; the wiring
//! pass only reads them.

use crate::hook::{BindError, Binding, Cardinality, MultiHook, SingleHook};
use crate::module::{Module, ModuleRef};
use crate::parameter::ParameterParser;
use crate::runtime::ModuleContext;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

/// A constructed module: the trait object used for invocation plus the same
/// allocation as `Any`, which hook binders downcast to the concrete type.
pub struct LiveModule {
    module: ModuleRef,
    instance: Arc<dyn Any + Send + Sync>,
}

impl LiveModule {
    fn new<M: Module>(module: M) -> Self {
        let module = Arc::new(module);
        Self {
            module: module.clone(),
            instance: module,
        }
    }

    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// Borrow the instance as its concrete type.
    pub fn downcast_ref<M: Module>(&self) -> Option<&M> {
        self.instance.downcast_ref::<M>()
    }
}

type Instantiate =
    Arc<dyn Fn(&ModuleContext<'_>, Option<&str>) -> Result<LiveModule, String> + Send + Sync>;
type Binder = Arc<dyn Fn(&LiveModule, Binding) -> Result<(), BindError> + Send + Sync>;
type Setter<M> = Arc<dyn Fn(&mut M, &str, &ParameterParser) -> Result<(), String> + Send + Sync>;

/// One connection point declared by a module type.
pub struct HookDescriptor {
    name: String,
    cardinality: Cardinality,
    index: usize,
    binder: Binder,
}

impl HookDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Ordinal used to order wiring deterministically.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn bind(&self, target: &LiveModule, binding: Binding) -> Result<(), BindError> {
        (self.binder)(target, binding)
    }
}

impl std::fmt::Debug for HookDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDescriptor")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("index", &self.index)
            .finish()
    }
}

pub struct ModuleDescriptor {
    type_name: String,
    hooks: Vec<HookDescriptor>,
    parameter_type: Option<&'static str>,
    instantiate: Instantiate,
}

impl ModuleDescriptor {
    /// Start describing a module built by `factory` from the runtime context.
    pub fn builder<M: Module>(
        type_name: impl Into<String>,
        factory: impl Fn(&ModuleContext<'_>) -> M + Send + Sync + 'static,
    ) -> ModuleBuilder<M> {
        ModuleBuilder {
            type_name: type_name.into(),
            factory: Arc::new(factory),
            hooks: Vec::new(),
            parameter: None,
        }
    }

    /// Start describing a module that needs no runtime context.
    pub fn builder_default<M: Module + Default>(type_name: impl Into<String>) -> ModuleBuilder<M> {
        Self::builder(type_name, |_| M::default())
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Hooks in index order.
    pub fn hooks(&self) -> &[HookDescriptor] {
        &self.hooks
    }

    pub fn hook(&self, name: &str) -> Option<&HookDescriptor> {
        self.hooks.iter().find(|h| h.name == name)
    }

    /// Rust type name of the declared parameter, if the module takes one.
    pub fn parameter_type(&self) -> Option<&'static str> {
        self.parameter_type
    }

    /// Run the factory and apply the parameter text, if any.
    pub fn instantiate(
        &self,
        ctx: &ModuleContext<'_>,
        parameter: Option<&str>,
    ) -> Result<LiveModule, String> {
        (self.instantiate)(ctx, parameter)
    }
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("type_name", &self.type_name)
            .field("hooks", &self.hooks)
            .field("parameter_type", &self.parameter_type)
            .finish()
    }
}

pub struct ModuleBuilder<M> {
    type_name: String,
    factory: Arc<dyn Fn(&ModuleContext<'_>) -> M + Send + Sync>,
    hooks: Vec<HookDescriptor>,
    parameter: Option<(&'static str, Setter<M>)>,
}

impl<M: Module> ModuleBuilder<M> {
    /// Declare a hook bound to exactly one module.
    pub fn single_hook(self, name: impl Into<String>, accessor: fn(&M) -> &SingleHook) -> Self {
        self.push_hook(name.into(), Cardinality::Single, move |target, binding| {
            let module = target.downcast_ref::<M>().ok_or(BindError::TypeMismatch)?;
            accessor(module).bind(binding)
        })
    }

    /// Declare a hook bound to an ordered array (`AtLeastOne` or `AnyNumber`).
    pub fn multi_hook(
        self,
        name: impl Into<String>,
        cardinality: Cardinality,
        accessor: fn(&M) -> &MultiHook,
    ) -> Self {
        let cardinality = if cardinality.is_multi() {
            cardinality
        } else {
            Cardinality::AtLeastOne
        };
        self.push_hook(name.into(), cardinality, move |target, binding| {
            let module = target.downcast_ref::<M>().ok_or(BindError::TypeMismatch)?;
            accessor(module).bind(binding)
        })
    }

    /// Declare the module's value parameter and how to assign it.
    pub fn parameter<T: Any + Send>(
        mut self,
        set: impl Fn(&mut M, T) + Send + Sync + 'static,
    ) -> Self {
        let setter: Setter<M> = Arc::new(move |module, text, parser| {
            let value = parser.parse::<T>(text)?;
            set(module, value);
            Ok(())
        });
        self.parameter = Some((type_name::<T>(), setter));
        self
    }

    pub fn build(self) -> ModuleDescriptor {
        let factory = self.factory;
        let setter = self.parameter.as_ref().map(|(_, s)| s.clone());
        let type_name = self.type_name.clone();
        let instantiate: Instantiate = Arc::new(move |ctx, parameter| {
            let mut module = factory(ctx);
            match (parameter, &setter) {
                (Some(text), Some(set)) => {
                    set(&mut module, text, ctx.runtime.parameters().as_ref())?
                }
                (Some(_), None) => {
                    return Err(format!("module type {} does not take a parameter", type_name))
                }
                (None, _) => {}
            }
            Ok(LiveModule::new(module))
        });
        ModuleDescriptor {
            type_name: self.type_name,
            hooks: self.hooks,
            parameter_type: self.parameter.map(|(name, _)| name),
            instantiate,
        }
    }

    fn push_hook(
        mut self,
        name: String,
        cardinality: Cardinality,
        binder: impl Fn(&LiveModule, Binding) -> Result<(), BindError> + Send + Sync + 'static,
    ) -> Self {
        let index = self.hooks.len();
        self.hooks.push(HookDescriptor {
            name,
            cardinality,
            index,
            binder: Arc::new(binder),
        });
        self
    }
}

pub struct ModuleRegistry {
    modules: HashMap<String, Arc<ModuleDescriptor>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// A registry holding only the built-in start module.
    pub fn new() -> Self {
        let mut registry = Self {
            modules: HashMap::new(),
        };
        registry.register(crate::modules::start::descriptor());
        registry
    }

    /// Register a module type. Replaces any existing type with the same name.
    pub fn register(&mut self, descriptor: ModuleDescriptor) {
        let name = descriptor.type_name().to_string();
        self.modules.insert(name, Arc::new(descriptor));
    }

    /// Remove a module type by name.
    pub fn remove(&mut self, type_name: &str) -> bool {
        self.modules.remove(type_name).is_some()
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<ModuleDescriptor>> {
        self.modules.get(type_name).cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.modules.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
