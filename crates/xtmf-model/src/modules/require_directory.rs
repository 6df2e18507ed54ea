//! RequireDirectory: a precondition module

use crate::module::Module;
use crate::registry::ModuleDescriptor;
use std::path::PathBuf;

pub const REQUIRE_DIRECTORY_TYPE: &str = "XTMF2.RuntimeModules.RequireDirectory";

/// Fails runtime validation when its directory is missing. Relative paths
/// resolve against the process working directory at validation time.
#[derive(Default)]
pub struct RequireDirectory {
    path: PathBuf,
}

impl Module for RequireDirectory {
    fn runtime_validation(&self) -> Result<(), String> {
        if self.path.is_dir() {
            Ok(())
        } else {
            Err(format!("required directory '{}' does not exist", self.path.display()))
        }
    }

    fn invoke(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::builder_default::<RequireDirectory>(REQUIRE_DIRECTORY_TYPE)
        .parameter::<PathBuf>(|m, path| m.path = path)
        .build()
}
