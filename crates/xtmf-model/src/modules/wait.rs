//! Wait: an action that blocks for its configured number of milliseconds

use crate::module::Module;
use crate::registry::ModuleDescriptor;
use std::time::Duration;

pub const WAIT_TYPE: &str = "XTMF2.RuntimeModules.Wait";

pub struct Wait {
    millis: u64,
}

impl Module for Wait {
    fn invoke(&self) -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(self.millis));
        Ok(())
    }
}

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::builder(WAIT_TYPE, |_| Wait { millis: 0 })
        .parameter::<u64>(|m, millis| m.millis = millis)
        .build()
}
