use bytes::Bytes;
use tokio::sync::oneshot;

pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

pub use error::TransferError;
pub use protocol::{CHUNK_SIZE, ProtocolMessage, TransferMeta};
pub use session::{SessionHandle, run_session, spawn_session};
pub use transfer::source::{DiskFile, FileSource, MemoryFile};

/// Which side of a transfer an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    pub fn is_sending(self) -> bool {
        matches!(self, Direction::Send)
    }
}

/// A fully reassembled inbound file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub meta: TransferMeta,
    pub data: Bytes,
}

impl ReceivedFile {
    /// MIME type the sender declared for this payload (may be empty)
    pub fn mime(&self) -> &str {
        &self.meta.mime
    }
}

/// Command from host to the session
pub enum AppCommand {
    /// Connect to a remote endpoint, closing any active connection first
    Connect { remote_id: String },
    /// Stream a file to the connected peer
    SendFile {
        source: Box<dyn FileSource>,
        reply: oneshot::Sender<Result<(), TransferError>>,
    },
    /// Close the active connection
    Disconnect,
}

impl std::fmt::Debug for AppCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppCommand::Connect { remote_id } => {
                f.debug_struct("Connect").field("remote_id", remote_id).finish()
            }
            AppCommand::SendFile { source, .. } => f
                .debug_struct("SendFile")
                .field("meta", source.meta())
                .finish(),
            AppCommand::Disconnect => f.write_str("Disconnect"),
        }
    }
}

/// Report from the session to the host
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Transport reported the connection open
    Connected {
        remote_id: String,
    },

    /// Active connection closed, failed or was closed locally
    Disconnected,

    TransferStarted {
        meta: TransferMeta,
        direction: Direction,
    },

    TransferProgress {
        file_name: String,
        /// Fraction of the declared size done, in `[0.0, 1.0]`
        fraction: f64,
        bytes_done: u64,
        total_bytes: u64,
        speed_bps: f64,
        direction: Direction,
    },

    /// `payload` is `None` on the sending side
    TransferCompleted {
        payload: Option<ReceivedFile>,
        meta: TransferMeta,
        direction: Direction,
    },

    /// Diagnostic: bytes received at `end` differ from the declared size.
    /// The transfer still completes.
    SizeMismatch {
        meta: TransferMeta,
        received: u64,
    },

    Error(String),
}
