use anyhow::{Context, Result, bail};
use iroh::Endpoint;
use iroh::endpoint::Incoming;
use pollen_core::transport::{LINK_BUFFER, Link, LinkEvent, LinkSender};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::link::{IrohLinkSender, pump_frames};
use crate::protocol::recv_frame;

/// Accepts inbound connections and hands them to the session as links
pub struct ConnectionListener {
    endpoint: Endpoint,
    closing: TaskTracker,
}

impl ConnectionListener {
    pub fn new(endpoint: Endpoint, closing: TaskTracker) -> Self {
        Self { endpoint, closing }
    }

    /// Run the accept loop on a background task
    pub fn spawn(self, incoming_tx: mpsc::Sender<Link>) -> JoinHandle<()> {
        tokio::spawn(async move { self.listen(incoming_tx).await })
    }

    /// Accept connections until the endpoint closes. Each connection is
    /// handled in a separate task.
    pub async fn listen(&self, incoming_tx: mpsc::Sender<Link>) {
        info!("Waiting for incoming connections on {}", self.endpoint.id());

        while let Some(incoming) = self.endpoint.accept().await {
            if incoming_tx.is_closed() {
                break;
            }
            let incoming_tx = incoming_tx.clone();
            let closing = self.closing.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, incoming_tx, closing).await {
                    error!("Error handling connection: {:#}", e);
                }
            });
        }

        warn!("Endpoint closed, stopping listener");
    }
}

async fn handle_connection(
    incoming: Incoming,
    incoming_tx: mpsc::Sender<Link>,
    closing: TaskTracker,
) -> Result<()> {
    let connection = incoming.await.context("Failed to accept connection")?;
    let remote_id = connection.remote_id();
    info!("Connection accepted from {}", remote_id);

    let (send, mut recv) = connection
        .accept_bi()
        .await
        .context("Failed to accept stream")?;

    let hello = recv_frame(&mut recv).await?;
    if !hello.is_empty() {
        connection.close(1u8.into(), b"expected hello");
        bail!("Peer {} did not start with a hello frame", remote_id);
    }

    let (events_tx, events_rx) = mpsc::channel(LINK_BUFFER);
    let cancel = CancellationToken::new();
    let link = Link::new(remote_id.to_string(), events_rx, cancel.clone());

    let sender = Arc::new(IrohLinkSender::new(connection, send, closing));
    let _ = events_tx
        .send(LinkEvent::Open(sender.clone() as Arc<dyn LinkSender>))
        .await;

    if incoming_tx.send(link).await.is_err() {
        sender.close();
        return Ok(());
    }

    pump_frames(recv, sender, events_tx, cancel).await;
    info!("Connection handler finished for {}", remote_id);
    Ok(())
}
