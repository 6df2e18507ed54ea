//! XTMF bus roles - the host, client and run-process ends of the binary
//! protocol, plus process launching

pub mod bus;
pub mod client;
pub mod host;
pub mod process;
pub mod run_bus;
pub mod stream;

pub use bus::Bus;
pub use client::{Client, ClientExit};
pub use host::{Host, HostEvents, NoopEvents, RunRecord, RunStatus};
pub use process::{
    executor_for, CommandLauncher, LaunchedProcess, ProcessExecutor, ProcessLauncher,
    RUN_PROCESS_EXITED,
};
pub use run_bus::{BusExit, RunBus};
pub use stream::{BoxReader, BoxWriter, Duplex, MessageWriter};
