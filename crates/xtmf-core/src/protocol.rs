//! Binary protocol spoken on every link of the process chain
//!
//! Wire format (little-endian, `BinaryWriter` compatible):
//!
//!   message := tag:i32 payload
//!   string  := len:7-bit-varint utf8[len]
//!   blob    := len:i64 bytes[len]
//!
//! Inbound commands travel toward the worker side (Host → Client, Client → Run).
//! Outbound commands travel back (Client → Host, Run → Client). The two
//! vocabularies share the same tag numbers, so a reader must only ever decode
//! the vocabulary of the direction it is reading.

use crate::error::{Error, Result};
use crate::types::RunId;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

pub mod inbound_tag {
    pub const RUN_MODEL_SYSTEM: i32 = 0;
    pub const CANCEL_RUN: i32 = 1;
    pub const KILL_RUN: i32 = 2;
    pub const CLIENT_EXITING: i32 = 3;
}

pub mod outbound_tag {
    pub const HEARTBEAT: i32 = 0;
    pub const CLIENT_READY: i32 = 1;
    pub const CLIENT_EXITING: i32 = 2;
    pub const FINISHED_RUN: i32 = 3;
    pub const RUN_VALIDATION_ERROR: i32 = 4;
    pub const RUN_FAILED: i32 = 5;
    pub const STATUS_UPDATE: i32 = 6;
    pub const PROGRESS_UPDATE: i32 = 7;
}

/// Longest string the reader accepts (matches the i32 length ceiling of the sender).
const MAX_STRING_LEN: u64 = i32::MAX as u64;

// ---------------------------------------------------------------------------
// Inbound: requester → worker
// ---------------------------------------------------------------------------

/// A request to execute one model system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub id: RunId,
    /// Working directory for the run; created if missing.
    pub cwd: String,
    /// Dotted path to the start node, e.g. `boundary.start`.
    pub start_path: String,
    /// UTF-16LE encoded model system document.
    pub model_system: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    RunModelSystem(RunRequest),
    CancelRun { run_id: RunId },
    KillRun { run_id: RunId },
    /// The requester asks the worker to leave its loop.
    ClientExiting,
}

impl InboundCommand {
    pub fn tag(&self) -> i32 {
        match self {
            Self::RunModelSystem(_) => inbound_tag::RUN_MODEL_SYSTEM,
            Self::CancelRun { .. } => inbound_tag::CANCEL_RUN,
            Self::KillRun { .. } => inbound_tag::KILL_RUN,
            Self::ClientExiting => inbound_tag::CLIENT_EXITING,
        }
    }

    /// Encode the whole message into one buffer so it can be written atomically.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_i32_le(self.tag());
        match self {
            Self::RunModelSystem(req) => {
                put_string(&mut buf, req.id.as_str());
                put_string(&mut buf, &req.cwd);
                put_string(&mut buf, &req.start_path);
                put_blob(&mut buf, &req.model_system);
            }
            Self::CancelRun { run_id } | Self::KillRun { run_id } => {
                put_string(&mut buf, run_id.as_str());
            }
            Self::ClientExiting => {}
        }
        buf.freeze()
    }

    /// Read the next inbound command. `Ok(None)` means the stream ended cleanly
    /// between messages.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Self>> {
        let tag = match read_tag(reader).await? {
            Some(tag) => tag,
            None => return Ok(None),
        };
        let command = match tag {
            inbound_tag::RUN_MODEL_SYSTEM => {
                let id = RunId::new(read_string(reader).await?);
                let cwd = read_string(reader).await?;
                let start_path = read_string(reader).await?;
                let model_system = read_blob(reader).await?;
                Self::RunModelSystem(RunRequest {
                    id,
                    cwd,
                    start_path,
                    model_system,
                })
            }
            inbound_tag::CANCEL_RUN => Self::CancelRun {
                run_id: RunId::new(read_string(reader).await?),
            },
            inbound_tag::KILL_RUN => Self::KillRun {
                run_id: RunId::new(read_string(reader).await?),
            },
            inbound_tag::CLIENT_EXITING => Self::ClientExiting,
            other => return Err(Error::UnknownCommand { tag: other }),
        };
        Ok(Some(command))
    }
}

// ---------------------------------------------------------------------------
// Outbound: worker → requester
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    /// Liveness signal carrying the active run, if any.
    Heartbeat { run_id: Option<RunId> },
    ClientReady,
    ClientExiting,
    FinishedRun { run_id: RunId },
    /// Used for both structural and runtime-validation failures.
    RunValidationError { run_id: RunId, message: String },
    RunFailed {
        run_id: RunId,
        message: String,
        stack_trace: String,
    },
    StatusUpdate { run_id: RunId, message: String },
    ProgressUpdate { run_id: RunId, progress: f32 },
}

impl OutboundCommand {
    pub fn tag(&self) -> i32 {
        match self {
            Self::Heartbeat { .. } => outbound_tag::HEARTBEAT,
            Self::ClientReady => outbound_tag::CLIENT_READY,
            Self::ClientExiting => outbound_tag::CLIENT_EXITING,
            Self::FinishedRun { .. } => outbound_tag::FINISHED_RUN,
            Self::RunValidationError { .. } => outbound_tag::RUN_VALIDATION_ERROR,
            Self::RunFailed { .. } => outbound_tag::RUN_FAILED,
            Self::StatusUpdate { .. } => outbound_tag::STATUS_UPDATE,
            Self::ProgressUpdate { .. } => outbound_tag::PROGRESS_UPDATE,
        }
    }

    /// The run this message reports on, if it carries one.
    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Self::Heartbeat { run_id } => run_id.as_ref(),
            Self::ClientReady | Self::ClientExiting => None,
            Self::FinishedRun { run_id }
            | Self::RunValidationError { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::StatusUpdate { run_id, .. }
            | Self::ProgressUpdate { run_id, .. } => Some(run_id),
        }
    }

    /// True for the three messages that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinishedRun { .. } | Self::RunValidationError { .. } | Self::RunFailed { .. }
        )
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_i32_le(self.tag());
        match self {
            Self::Heartbeat { run_id } => {
                put_string(&mut buf, run_id.as_ref().map(RunId::as_str).unwrap_or(""));
            }
            Self::ClientReady | Self::ClientExiting => {}
            Self::FinishedRun { run_id } => put_string(&mut buf, run_id.as_str()),
            Self::RunValidationError { run_id, message }
            | Self::StatusUpdate { run_id, message } => {
                put_string(&mut buf, run_id.as_str());
                put_string(&mut buf, message);
            }
            Self::RunFailed {
                run_id,
                message,
                stack_trace,
            } => {
                put_string(&mut buf, run_id.as_str());
                put_string(&mut buf, message);
                put_string(&mut buf, stack_trace);
            }
            Self::ProgressUpdate { run_id, progress } => {
                put_string(&mut buf, run_id.as_str());
                buf.put_f32_le(*progress);
            }
        }
        buf.freeze()
    }

    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Self>> {
        let tag = match read_tag(reader).await? {
            Some(tag) => tag,
            None => return Ok(None),
        };
        let command = match tag {
            outbound_tag::HEARTBEAT => {
                let id = read_string(reader).await?;
                Self::Heartbeat {
                    run_id: (!id.is_empty()).then(|| RunId::new(id)),
                }
            }
            outbound_tag::CLIENT_READY => Self::ClientReady,
            outbound_tag::CLIENT_EXITING => Self::ClientExiting,
            outbound_tag::FINISHED_RUN => Self::FinishedRun {
                run_id: RunId::new(read_string(reader).await?),
            },
            outbound_tag::RUN_VALIDATION_ERROR => Self::RunValidationError {
                run_id: RunId::new(read_string(reader).await?),
                message: read_string(reader).await?,
            },
            outbound_tag::RUN_FAILED => Self::RunFailed {
                run_id: RunId::new(read_string(reader).await?),
                message: read_string(reader).await?,
                stack_trace: read_string(reader).await?,
            },
            outbound_tag::STATUS_UPDATE => Self::StatusUpdate {
                run_id: RunId::new(read_string(reader).await?),
                message: read_string(reader).await?,
            },
            outbound_tag::PROGRESS_UPDATE => Self::ProgressUpdate {
                run_id: RunId::new(read_string(reader).await?),
                progress: reader.read_f32_le().await.map_err(truncated)?,
            },
            other => return Err(Error::UnknownCommand { tag: other }),
        };
        Ok(Some(command))
    }
}

// ---------------------------------------------------------------------------
// Primitive encoding
// ---------------------------------------------------------------------------

pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

pub fn put_blob(buf: &mut BytesMut, value: &[u8]) {
    buf.put_i64_le(value.len() as i64);
    buf.put_slice(value);
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read a tag, telling a clean end of stream apart from a cut-off message.
async fn read_tag<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<i32>> {
    let mut tag = [0u8; 4];
    let first = reader.read(&mut tag).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < tag.len() {
        reader
            .read_exact(&mut tag[first..])
            .await
            .map_err(truncated)?;
    }
    Ok(Some(i32::from_le_bytes(tag)))
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..35).step_by(7) {
        let byte = reader.read_u8().await.map_err(truncated)?;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::protocol("string length prefix is longer than 5 bytes"))
}

pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = read_varint(reader).await?;
    if len > MAX_STRING_LEN {
        return Err(Error::protocol(format!("string length {} out of range", len)));
    }
    let bytes = read_exact_len(reader, len).await?;
    String::from_utf8(bytes).map_err(|e| Error::protocol(format!("invalid utf-8 string: {}", e)))
}

pub async fn read_blob<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let len = reader.read_i64_le().await.map_err(truncated)?;
    if len < 0 {
        return Err(Error::protocol(format!("negative blob length {}", len)));
    }
    Ok(Bytes::from(read_exact_len(reader, len as u64).await?))
}

/// Reads exactly `len` bytes, growing the buffer as data arrives rather than
/// trusting the length prefix with one large allocation.
async fn read_exact_len<R: AsyncRead + Unpin>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(64 * 1024) as usize);
    let read = (&mut *reader).take(len).read_to_end(&mut buf).await?;
    if (read as u64) < len {
        return Err(Error::connection_closed(format!(
            "stream ended after {} of {} bytes",
            read, len
        )));
    }
    Ok(buf)
}

fn truncated(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::connection_closed("stream ended mid-message")
    } else {
        Error::IoError(e)
    }
}
