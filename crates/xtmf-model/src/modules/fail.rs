//! Fail: an action that always fails with its configured message

use crate::error::ModuleError;
use crate::module::Module;
use crate::registry::ModuleDescriptor;

pub const FAIL_TYPE: &str = "XTMF2.RuntimeModules.Fail";

pub struct Fail {
    name: String,
    message: String,
}

impl Module for Fail {
    fn invoke(&self) -> anyhow::Result<()> {
        Err(ModuleError::new(&self.name, &self.message).into())
    }
}

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::builder(FAIL_TYPE, |ctx| Fail {
        name: ctx.name.to_string(),
        message: "failed".into(),
    })
    .parameter::<String>(|m, message| m.message = message)
    .build()
}
