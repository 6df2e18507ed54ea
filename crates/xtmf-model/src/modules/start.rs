//! Start: the module backing every Start node

use crate::hook::SingleHook;
use crate::module::Module;
use crate::registry::ModuleDescriptor;

pub const START_TYPE: &str = "XTMF2.RuntimeModules.Start";

#[derive(Default)]
pub struct StartModule {
    to_execute: SingleHook,
}

impl Module for StartModule {
    fn invoke(&self) -> anyhow::Result<()> {
        self.to_execute.invoke()
    }
}

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::builder_default::<StartModule>(START_TYPE)
        .single_hook("ToExecute", |m| &m.to_execute)
        .build()
}
