//! xtmf - entry points of the model-system process chain
//!
//! The same executable plays all three roles: the host side (`submit`), the
//! client that schedules runs and the run process that executes one.

pub mod commands;
pub mod logging;

pub use commands::{
    client_launcher, read_model_system, run_client, run_process, runtime, submit, ConsoleEvents,
    Submission,
};
pub use logging::init_logging;
