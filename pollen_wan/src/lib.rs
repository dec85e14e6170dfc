//! WAN transport for pollen sessions, backed by iroh.
//!
//! Each connection carries a single bi-directional QUIC stream. Frames are
//! length-prefixed (u32, big-endian); the dialer opens with an empty hello
//! frame so the listener can accept the stream.

pub mod connector;
pub mod identity;
pub mod link;
pub mod listener;
pub mod protocol;

pub use connector::{Connector, bind_endpoint};
pub use identity::IdentityManager;
pub use link::IrohLinkSender;
pub use listener::ConnectionListener;
pub use protocol::{ALPN, MAX_FRAME_SIZE};

use anyhow::Result;
use iroh::SecretKey;
use pollen_core::transport::Link;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bind an endpoint and start accepting. Returns the dialer plus the queue of
/// inbound links, ready for `pollen_core::spawn_session`.
pub async fn start(secret_key: SecretKey) -> Result<(Arc<Connector>, mpsc::Receiver<Link>)> {
    let endpoint = bind_endpoint(secret_key).await?;
    let connector = Connector::new(endpoint);

    let (incoming_tx, incoming_rx) = mpsc::channel(16);
    connector.listener().spawn(incoming_tx);

    Ok((Arc::new(connector), incoming_rx))
}
