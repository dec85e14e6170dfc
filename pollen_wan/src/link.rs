use async_trait::async_trait;
use bytes::Bytes;
use iroh::endpoint::{Connection, RecvStream, SendStream};
use pollen_core::TransferError;
use pollen_core::transport::{LinkEvent, LinkSender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::protocol::{recv_frame, send_frame};

/// How long a closing link waits for the peer to acknowledge written frames
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Send half of a link backed by one QUIC bi-directional stream
pub struct IrohLinkSender {
    connection: Connection,
    send: Arc<Mutex<SendStream>>,
    open: AtomicBool,
    closing: TaskTracker,
}

impl IrohLinkSender {
    /// `closing` tracks the background close, so the endpoint can wait for it
    /// before shutting down
    pub fn new(connection: Connection, send: SendStream, closing: TaskTracker) -> Self {
        Self {
            connection,
            send: Arc::new(Mutex::new(send)),
            open: AtomicBool::new(true),
            closing,
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkSender for IrohLinkSender {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::ConnectionFailed("link closed".to_string()));
        }
        let mut send = self.send.lock().await;
        send_frame(&mut send, &frame).await.map_err(|e| {
            self.mark_closed();
            TransferError::ConnectionFailed(format!("{:#}", e))
        })
    }

    /// Finish the stream so frames already written still reach the peer,
    /// then close the connection
    fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Closing connection to {}", self.connection.remote_id());

        let connection = self.connection.clone();
        let send = self.send.clone();
        self.closing.spawn(async move {
            let mut send = send.lock().await;
            if send.finish().is_ok() {
                let _ = tokio::time::timeout(CLOSE_GRACE, send.stopped()).await;
            }
            connection.close(0u8.into(), b"closed");
        });
    }
}

/// Forward frames from `recv` to the link's event queue until the stream
/// ends, the session drops the link or `cancel` fires. The empty hello frame
/// is never surfaced.
pub(crate) async fn pump_frames(
    mut recv: RecvStream,
    sender: Arc<IrohLinkSender>,
    events: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                sender.close();
                return;
            }
            _ = events.closed() => {
                sender.close();
                return;
            }
            frame = recv_frame(&mut recv) => frame,
        };

        match frame {
            Ok(frame) if frame.is_empty() => continue,
            Ok(frame) => {
                if events.send(LinkEvent::Data(frame)).await.is_err() {
                    sender.close();
                    return;
                }
            }
            Err(e) => {
                sender.mark_closed();
                let event = if is_clean_close(&e) {
                    debug!("Stream closed by peer");
                    LinkEvent::Closed
                } else {
                    LinkEvent::Error(format!("{:#}", e))
                };
                let _ = events.send(event).await;
                return;
            }
        }
    }
}

/// Stream closed or finished by the peer, as opposed to a transport failure
fn is_clean_close(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    msg.contains("closed") || msg.contains("finished early")
}
