//! Built-in runtime modules.
//!
//! Each module is a self-contained file exposing a `descriptor()`. To add one:
//! 1. Create the file in this directory
//! 2. Implement the Module trait and a `descriptor()` builder call
//! 3. Add `pub mod <name>;` here
//! 4. Register it in default_registry() in ../lib.rs

pub mod execute;
pub mod fail;
pub mod require_directory;
pub mod start;
pub mod status;
pub mod wait;
