//! Boundary to the message transport.
//!
//! A transport delivers discrete frames between two named endpoints, in the
//! order they were sent, at most once. NAT traversal and signaling live behind
//! this boundary; the session only sees [`Link`]s.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

/// Capacity of a link's event queue
pub const LINK_BUFFER: usize = 256;

/// Lifecycle and data events of one link
#[derive(Clone)]
pub enum LinkEvent {
    /// The link is usable; carries its send capability
    Open(Arc<dyn LinkSender>),
    Data(Bytes),
    Closed,
    Error(String),
}

impl std::fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkEvent::Open(_) => f.write_str("Open"),
            LinkEvent::Data(data) => write!(f, "Data({} bytes)", data.len()),
            LinkEvent::Closed => f.write_str("Closed"),
            LinkEvent::Error(e) => write!(f, "Error({})", e),
        }
    }
}

/// Send half of an open link
#[async_trait]
pub trait LinkSender: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue one frame for delivery to the remote endpoint
    async fn send(&self, frame: Bytes) -> Result<(), TransferError>;

    /// Close the link without draining anything in flight
    fn close(&self);
}

/// One connection (or connection attempt) to a single remote endpoint
pub struct Link {
    remote_id: String,
    events: mpsc::Receiver<LinkEvent>,
    cancel: CancellationToken,
    closed: Option<CancellationToken>,
}

impl Link {
    /// Build a link from its event queue. `cancel` is triggered when the
    /// owner abandons the link, so pending dials can stop.
    pub fn new(
        remote_id: impl Into<String>,
        events: mpsc::Receiver<LinkEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            events,
            cancel,
            closed: None,
        }
    }

    /// Report `Closed` once `closed` fires and every queued event has been
    /// read. For adapters whose close notice must not wait for queue space.
    pub fn with_close_signal(mut self, closed: CancellationToken) -> Self {
        self.closed = Some(closed);
        self
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Next event; a dropped event queue reads as `Closed`
    pub async fn next_event(&mut self) -> LinkEvent {
        let Some(closed) = self.closed.as_ref() else {
            return self.events.recv().await.unwrap_or(LinkEvent::Closed);
        };

        tokio::select! {
            biased;
            event = self.events.recv() => event.unwrap_or(LinkEvent::Closed),
            _ = closed.cancelled() => LinkEvent::Closed,
        }
    }

    /// Abandon the link; pending dials stop and no further events are read
    pub fn abandon(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("remote_id", &self.remote_id)
            .finish()
    }
}

/// Outbound half of a transport. Inbound links are handed to the session on
/// a separate `mpsc::Receiver<Link>` owned by the adapter.
pub trait Transport: Send + Sync {
    /// Start connecting to `remote_id`. Returns immediately; the outcome is
    /// reported as `Open` or `Error` on the link.
    fn dial(&self, remote_id: &str) -> Link;
}
