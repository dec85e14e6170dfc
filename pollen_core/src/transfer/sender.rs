use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::source::FileSource;
use super::utils::{progress_fraction, speed_bps};
use crate::error::TransferError;
use crate::protocol::{CHUNK_SIZE, ProtocolMessage};
use crate::transport::LinkSender;
use crate::{AppEvent, Direction};

/// How an outbound transfer ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// `end` was sent
    Completed,
    /// Connection closed or the transfer was cancelled; `end` was not sent
    Aborted,
}

/// Single-flight slot for outbound transfers on one session
#[derive(Debug, Clone, Default)]
pub struct FileSender {
    busy: Arc<AtomicBool>,
}

impl FileSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Claim the slot; released when the returned guard is dropped
    pub fn try_acquire(&self) -> Result<SendGuard, TransferError> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| TransferError::TransferAlreadyInProgress)?;
        Ok(SendGuard {
            busy: self.busy.clone(),
        })
    }
}

/// Guard for the active send slot
#[derive(Debug)]
pub struct SendGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Stream one file over `link`: `meta`, then one `chunk` per slice, then `end`.
///
/// Control is handed back to the scheduler after every slice so inbound
/// traffic and host events keep flowing during large sends. Closing the link
/// or cancelling `cancel` stops the transfer before the next frame; nothing
/// further is sent and no completion is reported.
pub async fn stream_file(
    guard: SendGuard,
    source: &mut dyn FileSource,
    link: Arc<dyn LinkSender>,
    event_tx: &mpsc::Sender<AppEvent>,
    cancel: &CancellationToken,
) -> Result<SendOutcome, TransferError> {
    let meta = source.meta().clone();
    let total = meta.size;
    info!("Sending file: {} ({} bytes)", meta.name, total);

    if !send_frame(&link, cancel, ProtocolMessage::Meta(meta.clone())).await? {
        return Ok(aborted(&meta.name, 0, total));
    }
    let started = AppEvent::TransferStarted {
        meta: meta.clone(),
        direction: Direction::Send,
    };
    if !report(event_tx, cancel, started).await {
        return Ok(aborted(&meta.name, 0, total));
    }

    let mut offset: u64 = 0;
    let start_time = Instant::now();

    while offset < total {
        if cancel.is_cancelled() || !link.is_open() {
            return Ok(aborted(&meta.name, offset, total));
        }

        let len = CHUNK_SIZE.min((total - offset) as usize);
        let data = source.read_at(offset, len).await?;
        if data.is_empty() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{} ended at {} of {} bytes",
                    meta.name, offset, total
                ),
            )));
        }
        let sent = data.len() as u64;

        if !send_frame(&link, cancel, ProtocolMessage::Chunk { data }).await? {
            return Ok(aborted(&meta.name, offset, total));
        }
        offset += sent;

        let elapsed = start_time.elapsed().as_secs_f64();
        let progress = AppEvent::TransferProgress {
            file_name: meta.name.clone(),
            fraction: progress_fraction(offset, total),
            bytes_done: offset,
            total_bytes: total,
            speed_bps: speed_bps(offset, elapsed),
            direction: Direction::Send,
        };
        if !report(event_tx, cancel, progress).await {
            return Ok(aborted(&meta.name, offset, total));
        }

        if offset < total {
            tokio::task::yield_now().await;
        }
    }

    if !send_frame(&link, cancel, ProtocolMessage::End).await? {
        return Ok(aborted(&meta.name, offset, total));
    }

    // Slot is free as soon as `end` is out
    drop(guard);
    info!("File sent: {}", meta.name);
    let _ = event_tx
        .send(AppEvent::TransferCompleted {
            payload: None,
            meta,
            direction: Direction::Send,
        })
        .await;

    Ok(SendOutcome::Completed)
}

/// Hand `event` to the host unless the transfer is cancelled while the host
/// is not reading. `false` means cancelled.
async fn report(
    event_tx: &mpsc::Sender<AppEvent>,
    cancel: &CancellationToken,
    event: AppEvent,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = event_tx.send(event) => true,
    }
}

/// Send one message unless the link is gone. `Ok(false)` means abort.
async fn send_frame(
    link: &Arc<dyn LinkSender>,
    cancel: &CancellationToken,
    msg: ProtocolMessage,
) -> Result<bool, TransferError> {
    if cancel.is_cancelled() || !link.is_open() {
        return Ok(false);
    }

    let kind = msg.kind();
    let frame = msg.encode()?;
    tokio::select! {
        _ = cancel.cancelled() => Ok(false),
        result = link.send(frame) => match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Failed to send {} frame: {}", kind, e);
                Ok(false)
            }
        },
    }
}

fn aborted(file_name: &str, offset: u64, total: u64) -> SendOutcome {
    warn!(
        "Transfer of {} aborted at {}/{} bytes",
        file_name, offset, total
    );
    SendOutcome::Aborted
}
