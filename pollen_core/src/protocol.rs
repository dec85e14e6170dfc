//! Wire vocabulary shared by both peers.
//!
//! Three message shapes travel over a connection: `meta`, `chunk` and `end`.
//! Their JSON form is an object with a `type` discriminant:
//!
//! ```json
//! {"type":"meta","name":"a.txt","size":5,"mime":"text/plain"}
//! {"type":"chunk","data":[104,101]}
//! {"type":"end"}
//! ```
//!
//! Chunks normally take the binary fast path instead: a single
//! [`CHUNK_FRAME_TAG`] byte followed by the raw payload. No sequence numbers
//! are carried; ordering comes from the transport.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Slice size used when streaming a file (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Leading byte of a binary chunk frame. JSON frames always start with `{`
/// (or whitespace), so the two encodings never collide.
pub const CHUNK_FRAME_TAG: u8 = 0x01;

/// Descriptor of a file about to be transferred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMeta {
    pub name: String,
    pub size: u64,
    /// Content type, empty when unknown
    #[serde(default)]
    pub mime: String,
}

impl TransferMeta {
    pub fn new(name: impl Into<String>, size: u64, mime: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime: mime.into(),
        }
    }
}

/// Protocol messages for a single file transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    /// Announces the file that follows
    Meta(TransferMeta),
    /// One ordered slice of the file
    Chunk { data: Bytes },
    /// No more chunks for the announced file
    End,
}

impl ProtocolMessage {
    /// Encode a message into one transport frame
    pub fn encode(&self) -> Result<Bytes, TransferError> {
        match self {
            ProtocolMessage::Chunk { data } => {
                let mut frame = BytesMut::with_capacity(1 + data.len());
                frame.put_u8(CHUNK_FRAME_TAG);
                frame.put_slice(data);
                Ok(frame.freeze())
            }
            _ => Ok(Bytes::from(serde_json::to_vec(self)?)),
        }
    }

    /// Decode one transport frame.
    ///
    /// Anything that is not a well-formed message is reported as
    /// [`TransferError::MalformedMessage`]; callers drop such frames.
    pub fn decode(frame: &Bytes) -> Result<Self, TransferError> {
        let Some(&first) = frame.first() else {
            return Err(TransferError::MalformedMessage("empty frame".to_string()));
        };

        if first == CHUNK_FRAME_TAG {
            return Ok(ProtocolMessage::Chunk {
                data: frame.slice(1..),
            });
        }

        let msg: ProtocolMessage = serde_json::from_slice(frame)?;
        msg.validate()?;
        Ok(msg)
    }

    fn validate(&self) -> Result<(), TransferError> {
        match self {
            ProtocolMessage::Meta(meta) if meta.name.is_empty() => Err(
                TransferError::MalformedMessage("meta without a file name".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::Meta(_) => "meta",
            ProtocolMessage::Chunk { .. } => "chunk",
            ProtocolMessage::End => "end",
        }
    }
}
