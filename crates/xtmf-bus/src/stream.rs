//! Duplex byte streams and the serialized message writer

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use xtmf_core::{InboundCommand, OutboundCommand, Result};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Both directions of one inter-process link.
pub struct Duplex {
    reader: BoxReader,
    writer: BoxWriter,
}

impl Duplex {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split a single bidirectional stream, e.g. one end of `tokio::io::duplex`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    /// The process's own stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    pub fn into_parts(self) -> (BoxReader, MessageWriter) {
        (self.reader, MessageWriter::new(self.writer))
    }
}

/// Write half of a link. Each message is encoded into one buffer and written
/// with a single `write_all` under the lock, then flushed.
#[derive(Clone)]
pub struct MessageWriter {
    inner: Arc<Mutex<BoxWriter>>,
}

impl MessageWriter {
    pub fn new(writer: BoxWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn send_outbound(&self, command: &OutboundCommand) -> Result<()> {
        self.write_frame(command.encode()).await
    }

    pub async fn send_inbound(&self, command: &InboundCommand) -> Result<()> {
        self.write_frame(command.encode()).await
    }

    async fn write_frame(&self, frame: Bytes) -> Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the write direction. Errors are ignored; the peer may be gone.
    pub async fn shutdown(&self) {
        let mut writer = self.inner.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Drain queued outbound messages onto `writer` until every sender is gone
/// or the link fails.
pub(crate) async fn forward_outbound(
    mut events: mpsc::UnboundedReceiver<OutboundCommand>,
    writer: MessageWriter,
) {
    while let Some(command) = events.recv().await {
        if let Err(e) = writer.send_outbound(&command).await {
            warn!("failed to send {:?}: {}", command, e);
            break;
        }
    }
}
