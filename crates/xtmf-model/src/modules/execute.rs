//! Execute / ExecuteParallel: fan a single invocation out to many actions

use crate::hook::{Cardinality, MultiHook};
use crate::module::Module;
use crate::registry::ModuleDescriptor;

pub const EXECUTE_TYPE: &str = "XTMF2.RuntimeModules.Execute";
pub const EXECUTE_PARALLEL_TYPE: &str = "XTMF2.RuntimeModules.ExecuteParallel";

/// Invokes each bound action in link order, stopping at the first error.
#[derive(Default)]
pub struct Execute {
    to_execute: MultiHook,
}

impl Module for Execute {
    fn invoke(&self) -> anyhow::Result<()> {
        for module in self.to_execute.iter() {
            module.invoke()?;
        }
        Ok(())
    }
}

/// Invokes every bound action on its own scoped thread.
///
/// All actions run to completion; the error of the lowest-ordered failing
/// action is returned. A panicking action re-panics on the caller's thread.
#[derive(Default)]
pub struct ExecuteParallel {
    to_execute: MultiHook,
}

impl Module for ExecuteParallel {
    fn invoke(&self) -> anyhow::Result<()> {
        let results: Vec<anyhow::Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .to_execute
                .iter()
                .map(|module| scope.spawn(move || module.invoke()))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        });
        results.into_iter().collect()
    }
}

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::builder_default::<Execute>(EXECUTE_TYPE)
        .multi_hook("ToExecute", Cardinality::AnyNumber, |m| &m.to_execute)
        .build()
}

pub fn parallel_descriptor() -> ModuleDescriptor {
    ModuleDescriptor::builder_default::<ExecuteParallel>(EXECUTE_PARALLEL_TYPE)
        .multi_hook("ToExecute", Cardinality::AtLeastOne, |m| &m.to_execute)
        .build()
}
