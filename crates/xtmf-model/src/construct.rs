//! Construction: turn a model-system graph into a live, wired object graph
//!
//! Every enabled structure is instantiated through its registry descriptor,
//! then links are bound in (origin index, hook index) order. Required hooks
//! are checked before any binding happens, so a graph that fails here never
//! runs module code beyond its factories.

use crate::error::ModelError;
use crate::graph::{
    Link, LinkTargets, ModelSystem, ModelSystemStructure, StructureId, StructureKind,
};
use crate::hook::{BindError, Binding};
use crate::module::{panic_message, ModuleRef};
use crate::modules::start::START_TYPE;
use crate::registry::{HookDescriptor, LiveModule, ModuleDescriptor};
use crate::runtime::{ModuleContext, XtmfRuntime};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

pub struct LiveModelSystem {
    model_system: ModelSystem,
    modules: HashMap<StructureId, LiveModule>,
}

impl LiveModelSystem {
    /// Instantiate and wire `model_system` against the runtime's registry.
    pub fn construct(
        model_system: ModelSystem,
        runtime: &Arc<XtmfRuntime>,
    ) -> Result<Self, ModelError> {
        model_system.check_structure()?;
        let structures = model_system.structure_index();

        let mut descriptors: BTreeMap<StructureId, Arc<ModuleDescriptor>> = BTreeMap::new();
        for s in structures.values().filter(|s| !s.disabled) {
            descriptors.insert(s.id, descriptor_for(s, runtime)?);
        }

        let mut modules = HashMap::with_capacity(descriptors.len());
        for (id, descriptor) in &descriptors {
            let s = structures[id];
            let ctx = ModuleContext {
                runtime,
                name: &s.name,
            };
            let live = descriptor
                .instantiate(&ctx, s.parameter.as_deref())
                .map_err(|reason| ModelError::Parameter {
                    structure: s.name.clone(),
                    reason,
                })?;
            modules.insert(*id, live);
        }

        // Links from disabled origins never bind.
        let mut bound: HashMap<(StructureId, usize), (&HookDescriptor, &Link)> = HashMap::new();
        for link in model_system.links() {
            let Some(descriptor) = descriptors.get(&link.origin) else {
                continue;
            };
            let origin = structures[&link.origin];
            let hook = descriptor
                .hook(&link.hook)
                .ok_or_else(|| ModelError::UnknownHook {
                    structure: origin.name.clone(),
                    hook: link.hook.clone(),
                })?;
            if matches!(link.targets, LinkTargets::Multi(_)) && !hook.cardinality().is_multi() {
                return Err(ModelError::load(format!(
                    "hook '{}' on module '{}' takes a single module but has a multi-link",
                    hook.name(),
                    origin.name
                )));
            }
            bound.insert((link.origin, hook.index()), (hook, link));
        }

        for (id, descriptor) in &descriptors {
            let origin = structures[id];
            for hook in descriptor.hooks().iter().filter(|h| h.cardinality().is_required()) {
                let link = bound.get(&(*id, hook.index())).map(|(_, link)| *link);
                check_required(origin, hook, link, &structures)?;
            }
        }

        let mut order: Vec<_> = bound.into_iter().collect();
        order.sort_unstable_by_key(|(key, _)| *key);
        for ((origin_id, _), (hook, link)) in order {
            let mut destinations: Vec<ModuleRef> = enabled_targets(link, &structures)
                .filter_map(|id| modules.get(&id))
                .map(|live| live.module().clone())
                .collect();
            let origin = structures[&origin_id];
            debug!(
                module = %origin.name,
                hook = hook.name(),
                destinations = destinations.len(),
                "binding hook"
            );
            let binding = match (hook.cardinality().is_multi(), destinations.len()) {
                (false, 1) => Binding::Single(destinations.remove(0)),
                _ => Binding::Multi(destinations),
            };
            hook.bind(&modules[&origin_id], binding)
                .map_err(|e| bind_error(e, origin, hook))?;
        }

        debug!(modules = modules.len(), "model system constructed");
        Ok(Self {
            model_system,
            modules,
        })
    }

    pub fn model_system(&self) -> &ModelSystem {
        &self.model_system
    }

    /// The live instance of an enabled structure.
    pub fn module(&self, id: StructureId) -> Option<&LiveModule> {
        self.modules.get(&id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Resolve a dotted start path to the live start module.
    pub fn start(&self, path: &str) -> Result<(&ModelSystemStructure, &ModuleRef), ModelError> {
        let start = self.model_system.get_start(path)?;
        let live = self
            .modules
            .get(&start.id)
            .ok_or_else(|| ModelError::load(format!("start '{}' is disabled", start.name)))?;
        Ok((start, live.module()))
    }

    /// Run every live module's runtime validation, depth first over the
    /// boundary tree. The first failure is returned with its module's name.
    pub fn runtime_validate(&self) -> Result<(), ModelError> {
        let mut stack = vec![&self.model_system.global];
        while let Some(boundary) = stack.pop() {
            stack.extend(boundary.boundaries.iter());
            for s in &boundary.structures {
                let Some(live) = self.modules.get(&s.id) else {
                    continue;
                };
                let module = live.module();
                let checked = catch_unwind(AssertUnwindSafe(|| module.runtime_validation()))
                    .unwrap_or_else(|payload| {
                        Err(format!(
                            "runtime validation panicked: {}",
                            panic_message(payload.as_ref())
                        ))
                    });
                checked.map_err(|message| ModelError::RuntimeValidation {
                    module: s.name.clone(),
                    message,
                })?;
            }
        }
        Ok(())
    }
}

fn descriptor_for(
    structure: &ModelSystemStructure,
    runtime: &XtmfRuntime,
) -> Result<Arc<ModuleDescriptor>, ModelError> {
    let type_name = match &structure.kind {
        StructureKind::Start => START_TYPE,
        StructureKind::Module { type_name } => type_name.as_str(),
    };
    runtime
        .registry()
        .get(type_name)
        .ok_or_else(|| ModelError::UnknownModuleType {
            structure: structure.name.clone(),
            type_name: type_name.to_string(),
        })
}

fn enabled_targets<'a>(
    link: &'a Link,
    structures: &'a HashMap<StructureId, &'a ModelSystemStructure>,
) -> impl Iterator<Item = StructureId> + 'a {
    link.targets
        .as_slice()
        .iter()
        .filter(|t| !t.disabled && structures.get(&t.structure).is_some_and(|s| !s.disabled))
        .map(|t| t.structure)
}

fn check_required(
    origin: &ModelSystemStructure,
    hook: &HookDescriptor,
    link: Option<&Link>,
    structures: &HashMap<StructureId, &ModelSystemStructure>,
) -> Result<(), ModelError> {
    let missing = || ModelError::MissingRequiredHook {
        structure: origin.name.clone(),
        hook: hook.name().to_string(),
    };
    let link = link.ok_or_else(missing)?;
    if enabled_targets(link, structures).next().is_some() {
        return Ok(());
    }
    match link.targets.as_slice().first() {
        Some(target) => Err(ModelError::DisabledRequiredDestination {
            structure: origin.name.clone(),
            hook: hook.name().to_string(),
            destination: structures
                .get(&target.structure)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
        }),
        None => Err(missing()),
    }
}

fn bind_error(
    error: BindError,
    origin: &ModelSystemStructure,
    hook: &HookDescriptor,
) -> ModelError {
    match error {
        BindError::AlreadyBound => ModelError::HookAlreadyBound {
            structure: origin.name.clone(),
            hook: hook.name().to_string(),
        },
        BindError::TooMany => ModelError::load(format!(
            "hook '{}' on module '{}' takes a single module",
            hook.name(),
            origin.name
        )),
        BindError::TypeMismatch => ModelError::load(format!(
            "module '{}' does not match its registered type",
            origin.name
        )),
    }
}
