use bytes::{Bytes, BytesMut};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::utils::{progress_fraction, speed_bps};
use crate::protocol::{ProtocolMessage, TransferMeta};
use crate::{AppEvent, Direction, ReceivedFile};

/// Inbound file being accumulated
#[derive(Debug)]
struct IncomingFile {
    meta: TransferMeta,
    chunks: Vec<Bytes>,
    received: u64,
    start_time: Instant,
}

/// Reassembles inbound files from `meta` / `chunk` / `end` messages.
///
/// Idle while no `meta` has been seen. A new `meta` always wins: any partial
/// file is dropped without notice. Chunks are buffered in memory until `end`
/// and a stalled transfer is kept until it is superseded or abandoned.
#[derive(Debug, Default)]
pub struct FileReceiver {
    incoming: Option<IncomingFile>,
}

impl FileReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_receiving(&self) -> bool {
        self.incoming.is_some()
    }

    /// Meta of the file currently being received
    pub fn current(&self) -> Option<&TransferMeta> {
        self.incoming.as_ref().map(|f| &f.meta)
    }

    pub fn received_bytes(&self) -> u64 {
        self.incoming.as_ref().map_or(0, |f| f.received)
    }

    /// Apply one message and return the events it produces, in order
    pub fn handle(&mut self, msg: ProtocolMessage) -> Vec<AppEvent> {
        match msg {
            ProtocolMessage::Meta(meta) => self.on_meta(meta),
            ProtocolMessage::Chunk { data } => self.on_chunk(data),
            ProtocolMessage::End => self.on_end(),
        }
    }

    /// Drop any partial file, e.g. because the connection went away
    pub fn abandon(&mut self) {
        if let Some(file) = self.incoming.take() {
            warn!(
                "Abandoning receive of {} at {}/{} bytes",
                file.meta.name, file.received, file.meta.size
            );
        }
    }

    fn on_meta(&mut self, meta: TransferMeta) -> Vec<AppEvent> {
        if let Some(previous) = self.incoming.take() {
            debug!(
                "New meta supersedes {} ({}/{} bytes dropped)",
                previous.meta.name, previous.received, previous.meta.size
            );
        }

        info!("Receiving file: {} ({} bytes)", meta.name, meta.size);
        self.incoming = Some(IncomingFile {
            meta: meta.clone(),
            chunks: Vec::new(),
            received: 0,
            start_time: Instant::now(),
        });

        vec![AppEvent::TransferStarted {
            meta,
            direction: Direction::Receive,
        }]
    }

    fn on_chunk(&mut self, data: Bytes) -> Vec<AppEvent> {
        let Some(file) = self.incoming.as_mut() else {
            debug!("Ignoring chunk with no transfer in progress");
            return Vec::new();
        };

        file.received += data.len() as u64;
        file.chunks.push(data);

        let elapsed = file.start_time.elapsed().as_secs_f64();
        vec![AppEvent::TransferProgress {
            file_name: file.meta.name.clone(),
            fraction: progress_fraction(file.received, file.meta.size),
            bytes_done: file.received,
            total_bytes: file.meta.size,
            speed_bps: speed_bps(file.received, elapsed),
            direction: Direction::Receive,
        }]
    }

    fn on_end(&mut self) -> Vec<AppEvent> {
        let Some(file) = self.incoming.take() else {
            debug!("Ignoring end with no transfer in progress");
            return Vec::new();
        };

        let mut events = Vec::with_capacity(2);
        if file.received != file.meta.size {
            warn!(
                "Size mismatch for {}: declared {} bytes, received {}",
                file.meta.name, file.meta.size, file.received
            );
            events.push(AppEvent::SizeMismatch {
                meta: file.meta.clone(),
                received: file.received,
            });
        }

        let mut data = BytesMut::with_capacity(file.received as usize);
        for chunk in &file.chunks {
            data.extend_from_slice(chunk);
        }

        info!("File received successfully: {}", file.meta.name);
        events.push(AppEvent::TransferCompleted {
            payload: Some(ReceivedFile {
                meta: file.meta.clone(),
                data: data.freeze(),
            }),
            meta: file.meta,
            direction: Direction::Receive,
        });
        events
    }
}
