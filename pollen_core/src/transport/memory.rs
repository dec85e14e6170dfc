//! In-process transport.
//!
//! Endpoints register on a shared [`MemoryNetwork`] by id. Dialing a
//! registered id creates a connected pair of links; each side receives `Open`
//! as its first event. Frames travel over bounded channels, so a fast sender
//! waits for the remote session to catch up. Closing either end is signalled
//! to both sides out of band, so it is seen even when a queue is full.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{LINK_BUFFER, Link, LinkEvent, LinkSender, Transport};
use crate::error::TransferError;

/// Registry of in-process endpoints
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<String, mpsc::Sender<Link>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return its transport plus the queue of inbound links
    pub fn register(&self, id: impl Into<String>) -> (MemoryTransport, mpsc::Receiver<Link>) {
        let id = id.into();
        let (incoming_tx, incoming_rx) = mpsc::channel(16);
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.insert(id.clone(), incoming_tx);
        }
        (
            MemoryTransport {
                local_id: id,
                network: self.clone(),
            },
            incoming_rx,
        )
    }

    /// Remove `id`; later dials to it fail
    pub fn unregister(&self, id: &str) {
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.remove(id);
        }
    }

    fn lookup(&self, id: &str) -> Option<mpsc::Sender<Link>> {
        self.endpoints.lock().ok()?.get(id).cloned()
    }
}

/// One registered endpoint of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    local_id: String,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn dial(&self, remote_id: &str) -> Link {
        let (local_tx, local_rx) = mpsc::channel(LINK_BUFFER);
        let Some(remote_incoming) = self.network.lookup(remote_id) else {
            warn!("Dial failed: no endpoint registered as {}", remote_id);
            let _ = local_tx.try_send(LinkEvent::Error(format!(
                "Could not connect to peer {}",
                remote_id
            )));
            return Link::new(remote_id, local_rx, CancellationToken::new());
        };

        // Shared by both ends; either side closing or abandoning its link
        // ends the pair
        let closed = CancellationToken::new();
        let local_link =
            Link::new(remote_id, local_rx, closed.clone()).with_close_signal(closed.clone());

        let (remote_tx, remote_rx) = mpsc::channel(LINK_BUFFER);
        let remote_link = Link::new(self.local_id.clone(), remote_rx, closed.clone())
            .with_close_signal(closed.clone());

        let to_remote: Arc<dyn LinkSender> = Arc::new(MemoryLinkSender {
            peer: remote_tx.clone(),
            closed: closed.clone(),
        });
        let to_local: Arc<dyn LinkSender> = Arc::new(MemoryLinkSender {
            peer: local_tx.clone(),
            closed: closed.clone(),
        });

        let _ = remote_tx.try_send(LinkEvent::Open(to_local));
        if remote_incoming.try_send(remote_link).is_err() {
            warn!("Peer {} is not accepting connections", remote_id);
            closed.cancel();
            let _ = local_tx.try_send(LinkEvent::Error(format!(
                "Peer {} refused the connection",
                remote_id
            )));
            return local_link;
        }

        debug!("Memory link {} -> {} established", self.local_id, remote_id);
        let _ = local_tx.try_send(LinkEvent::Open(to_remote));
        local_link
    }
}

struct MemoryLinkSender {
    peer: mpsc::Sender<LinkEvent>,
    closed: CancellationToken,
}

#[async_trait]
impl LinkSender for MemoryLinkSender {
    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.peer.is_closed()
    }

    async fn send(&self, frame: Bytes) -> Result<(), TransferError> {
        if !self.is_open() {
            return Err(TransferError::ConnectionFailed("link closed".to_string()));
        }
        tokio::select! {
            _ = self.closed.cancelled() => {
                Err(TransferError::ConnectionFailed("link closed".to_string()))
            }
            result = self.peer.send(LinkEvent::Data(frame)) => result
                .map_err(|_| TransferError::ConnectionFailed("peer went away".to_string())),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
