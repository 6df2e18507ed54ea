//! Reader-task ownership shared by every bus role
//!
//! A bus owns one long-running reader task, the link's writer and optionally
//! the child process at the far end of the link. Disposal signals the reader,
//! waits for it within a bound, then closes the stream and reaps the child.

use crate::stream::{BoxReader, Duplex, MessageWriter};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use xtmf_core::{BusConfig, Error, Result};

pub struct Bus<T> {
    writer: MessageWriter,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<T>>>,
    child: Mutex<Option<Child>>,
    config: BusConfig,
    disposed: AtomicBool,
}

impl<T: Send + 'static> Bus<T> {
    /// Spawn `reader_loop` on its own task. The loop must return once the
    /// token is cancelled.
    pub fn spawn<F, Fut>(stream: Duplex, config: BusConfig, reader_loop: F) -> Self
    where
        F: FnOnce(BoxReader, MessageWriter, CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (reader, writer) = stream.into_parts();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reader_loop(reader, writer.clone(), cancel.clone()));
        Self {
            writer,
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
            child: Mutex::new(None),
            config,
            disposed: AtomicBool::new(false),
        }
    }

    /// Take ownership of the process at the far end of the link.
    pub fn attach_child(&self, child: Child) {
        *self.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
    }

    pub fn writer(&self) -> &MessageWriter {
        &self.writer
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Wait for the reader loop to end on its own and return its result.
    pub async fn join(&self) -> Result<T> {
        let task = self.task.lock().await.take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| Error::Internal(format!("bus reader task failed: {}", e))),
            None => Err(Error::Internal("bus reader already joined".into())),
        }
    }

    /// Stop the reader, close the stream and reap any child. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let deadline = tokio::time::Instant::now() + self.config.dispose_timeout();
            while !task.is_finished() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(self.config.dispose_poll()).await;
            }
            if !task.is_finished() {
                warn!(
                    "bus reader did not stop within {:?}; aborting",
                    self.config.dispose_timeout()
                );
                task.abort();
            }
        }

        self.writer.shutdown().await;

        let child = self.child.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(child) = child {
            reap(child, &self.config).await;
        }
        debug!("bus disposed");
    }
}

impl<T> Drop for Bus<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Give `child` the dispose bound to exit, then kill it.
pub(crate) async fn reap(mut child: Child, config: &BusConfig) {
    match tokio::time::timeout(config.dispose_timeout(), child.wait()).await {
        Ok(Ok(status)) => debug!("child process exited: {}", status),
        Ok(Err(e)) => warn!("failed waiting for child process: {}", e),
        Err(_) => {
            warn!("child process did not exit; killing it");
            let _ = child.kill().await;
        }
    }
}
