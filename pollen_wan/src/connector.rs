use anyhow::{Context, Result};
use iroh::endpoint::{Connection, RecvStream, SendStream};
use iroh::{Endpoint, EndpointId, SecretKey};
use pollen_core::transport::{LINK_BUFFER, Link, LinkEvent, LinkSender, Transport};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::link::{IrohLinkSender, pump_frames};
use crate::listener::ConnectionListener;
use crate::protocol::{ALPN, send_frame};

/// Bind an iroh endpoint that speaks the pollen ALPN
pub async fn bind_endpoint(secret_key: SecretKey) -> Result<Endpoint> {
    info!("Initializing Iroh endpoint...");

    let mut transport_config = iroh::endpoint::TransportConfig::default();
    transport_config.receive_window(iroh::endpoint::VarInt::from_u32(16 * 1024 * 1024));
    transport_config.send_window(16 * 1024 * 1024);
    transport_config.max_idle_timeout(Duration::from_secs(60).try_into().ok());

    let endpoint = Endpoint::builder()
        .secret_key(secret_key)
        .alpns(vec![ALPN.to_vec()])
        .transport_config(transport_config)
        .bind()
        .await
        .context("Failed to bind endpoint")?;

    info!("Endpoint initialized with Node ID: {}", endpoint.id());
    Ok(endpoint)
}

/// Outbound side of the WAN transport: dials peers by endpoint id
#[derive(Clone)]
pub struct Connector {
    endpoint: Endpoint,
    closing: TaskTracker,
}

impl Connector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            closing: TaskTracker::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the Node ID of this endpoint
    pub fn node_id(&self) -> EndpointId {
        self.endpoint.id()
    }

    /// Listener sharing this endpoint, so inbound and outbound use one port
    pub fn listener(&self) -> ConnectionListener {
        ConnectionListener::new(self.endpoint.clone(), self.closing.clone())
    }

    /// Gracefully closes the endpoint once closing links have finished
    pub async fn close(&self) {
        info!("Closing endpoint...");
        self.closing.close();
        self.closing.wait().await;
        self.endpoint.close().await;
    }
}

impl Transport for Connector {
    fn dial(&self, remote_id: &str) -> Link {
        let (events_tx, events_rx) = mpsc::channel(LINK_BUFFER);
        let cancel = CancellationToken::new();
        let link = Link::new(remote_id, events_rx, cancel.clone());

        tokio::spawn(dial_task(
            self.endpoint.clone(),
            self.closing.clone(),
            remote_id.to_string(),
            events_tx,
            cancel,
        ));
        link
    }
}

async fn dial_task(
    endpoint: Endpoint,
    closing: TaskTracker,
    remote_id: String,
    events: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Dial to {} abandoned", remote_id);
            return;
        }
        opened = open_stream(&endpoint, &remote_id) => opened,
    };

    let (connection, send, recv) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Dial to {} failed: {:#}", remote_id, e);
            let _ = events.send(LinkEvent::Error(format!("{:#}", e))).await;
            return;
        }
    };

    let sender = Arc::new(IrohLinkSender::new(connection, send, closing));
    if events
        .send(LinkEvent::Open(sender.clone() as Arc<dyn LinkSender>))
        .await
        .is_err()
    {
        sender.close();
        return;
    }

    pump_frames(recv, sender, events, cancel).await;
}

/// Connect, open the single bi-directional stream and announce it
async fn open_stream(
    endpoint: &Endpoint,
    remote_id: &str,
) -> Result<(Connection, SendStream, RecvStream)> {
    let target_id = EndpointId::from_str(remote_id).context("Invalid endpoint id")?;
    info!("Connecting to {} (UDP hole punch / relay)...", target_id);

    let start = std::time::Instant::now();
    let connection = endpoint
        .connect(target_id, ALPN)
        .await
        .context("Failed to connect to peer")?;
    info!("Connected to {} in {:?}", target_id, start.elapsed());

    let (mut send, recv) = connection
        .open_bi()
        .await
        .context("Failed to open stream")?;
    // The peer only sees the stream once something is written on it
    send_frame(&mut send, &[]).await?;

    Ok((connection, send, recv))
}
