//! XTMF Core - ids, errors, wire protocol and configuration shared by every process role

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{BusConfig, ClientConfig, HostConfig, Isolation, XtmfConfig};
pub use error::{Error, Result};
pub use protocol::*;
pub use types::*;
