//! Error types for the XTMF process chain

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown command tag {tag}")]
    UnknownCommand { tag: i32 },

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::ConnectionClosed(message.into())
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process(message.into())
    }

    /// True for errors that end a reader loop without indicating a fault.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }
}
