//! XTMF Run - run lifecycle, persisted results and the serial scheduler

pub mod cwd;
pub mod executor;
pub mod results;
pub mod run;
pub mod scheduler;

pub use cwd::WorkingDirectory;
pub use executor::{ChannelReporter, InProcessExecutor, RunEvents, RunExecutor};
pub use results::RunResults;
pub use run::{panic_message, Run, RunContext, RunOutcome, RunState};
pub use scheduler::Scheduler;
