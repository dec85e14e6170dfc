//! Connection lifecycle manager.
//!
//! A session owns at most one active connection. It dials on request, adopts
//! inbound connections (last connector wins), routes every inbound frame to
//! the [`FileReceiver`] and runs outbound files through [`stream_file`].
//! Everything that touches the connection slot or the receive state runs on
//! the session task; outbound streaming runs on its own task and is cancelled
//! whenever the connection it started on goes away.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TransferError;
use crate::protocol::ProtocolMessage;
use crate::transfer::receiver::FileReceiver;
use crate::transfer::sender::{FileSender, SendOutcome, stream_file};
use crate::transfer::source::FileSource;
use crate::transport::{Link, LinkEvent, LinkSender, Transport};
use crate::{AppCommand, AppEvent};

/// Capacity of the command queue
const COMMAND_BUFFER: usize = 64;

/// The single active connection
struct ActiveConnection {
    link: Link,
    /// Present once the transport reported the link open
    sender: Option<Arc<dyn LinkSender>>,
    /// Cancels outbound streaming bound to this connection
    cancel: CancellationToken,
}

impl ActiveConnection {
    fn new(link: Link) -> Self {
        Self {
            link,
            sender: None,
            cancel: CancellationToken::new(),
        }
    }

    fn remote_id(&self) -> &str {
        self.link.remote_id()
    }

    fn open_sender(&self) -> Option<Arc<dyn LinkSender>> {
        self.sender.as_ref().filter(|s| s.is_open()).cloned()
    }

    /// Fire-and-forget close; nothing in flight is drained
    fn close(mut self) {
        self.cancel.cancel();
        if let Some(sender) = self.sender.take() {
            sender.close();
        }
        self.link.abandon();
    }
}

enum Step {
    Command(Option<AppCommand>),
    Incoming(Option<Link>),
    Link(LinkEvent),
}

struct SessionState {
    transport: Arc<dyn Transport>,
    event_tx: mpsc::Sender<AppEvent>,
    active: Option<ActiveConnection>,
    receiver: FileReceiver,
    sender: FileSender,
}

impl SessionState {
    async fn next_link_event(&mut self) -> LinkEvent {
        match self.active.as_mut() {
            Some(active) => active.link.next_event().await,
            None => std::future::pending().await,
        }
    }

    async fn emit(&self, event: AppEvent) {
        let _ = self.event_tx.send(event).await;
    }

    /// Replace the active connection, abandoning whatever was in flight on
    /// the old one
    fn install(&mut self, link: Link) {
        if let Some(previous) = self.active.take() {
            info!("Closing connection with {}", previous.remote_id());
            previous.close();
        }
        self.receiver.abandon();
        self.active = Some(ActiveConnection::new(link));
    }

    /// Tear down after a close or error reported by the transport
    async fn teardown(&mut self, reason: &str) {
        if let Some(active) = self.active.take() {
            info!("Connection with {} ended: {}", active.remote_id(), reason);
            active.close();
            self.receiver.abandon();
            self.emit(AppEvent::Disconnected).await;
        }
    }

    async fn handle_command(&mut self, cmd: AppCommand) {
        match cmd {
            AppCommand::Connect { remote_id } => self.connect(&remote_id),
            AppCommand::SendFile { source, reply } => {
                let result = self.send_file(source);
                if let Err(e) = &result {
                    warn!("Send rejected: {}", e);
                    self.emit(AppEvent::Error(e.to_string())).await;
                }
                let _ = reply.send(result);
            }
            AppCommand::Disconnect => self.teardown("closed locally").await,
        }
    }

    fn connect(&mut self, remote_id: &str) {
        info!("Connecting to {}", remote_id);
        let link = self.transport.dial(remote_id);
        self.install(link);
    }

    fn adopt(&mut self, link: Link) {
        let remote_id = link.remote_id().to_string();
        match self.active.as_ref() {
            Some(active) if active.remote_id() != remote_id => {
                info!(
                    "Incoming connection from {} replaces {}",
                    remote_id,
                    active.remote_id()
                );
            }
            Some(_) => debug!("Peer {} reconnected", remote_id),
            None => info!("Incoming connection from {}", remote_id),
        }
        self.install(link);
    }

    fn send_file(&mut self, mut source: Box<dyn FileSource>) -> Result<(), TransferError> {
        let active = self
            .active
            .as_ref()
            .ok_or(TransferError::NoActiveConnection)?;
        let link = active
            .open_sender()
            .ok_or(TransferError::NoActiveConnection)?;
        let guard = self.sender.try_acquire()?;

        let cancel = active.cancel.child_token();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match stream_file(guard, source.as_mut(), link, &event_tx, &cancel).await {
                Ok(SendOutcome::Completed) => {}
                Ok(SendOutcome::Aborted) => {
                    debug!("Send of {} abandoned", source.meta().name);
                }
                Err(e) => {
                    error!("Error sending {}: {}", source.meta().name, e);
                    let _ = event_tx
                        .send(AppEvent::Error(format!(
                            "Error sending {}: {}",
                            source.meta().name,
                            e
                        )))
                        .await;
                }
            }
        });
        Ok(())
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Open(sender) => {
                let Some(active) = self.active.as_mut() else {
                    return;
                };
                active.sender = Some(sender);
                let remote_id = active.remote_id().to_string();
                info!("Connection open with: {}", remote_id);
                self.emit(AppEvent::Connected { remote_id }).await;
            }
            LinkEvent::Data(frame) => match ProtocolMessage::decode(&frame) {
                Ok(msg) => {
                    for event in self.receiver.handle(msg) {
                        self.emit(event).await;
                    }
                }
                Err(e) => debug!("Dropping frame: {}", e),
            },
            LinkEvent::Closed => self.teardown("closed").await,
            LinkEvent::Error(e) => {
                error!("Connection error: {}", e);
                self.teardown(&TransferError::ConnectionFailed(e).to_string())
                    .await;
            }
        }
    }
}

/// Run a session until the command channel closes.
///
/// `incoming` carries links accepted by the transport. Events for the host
/// are sent on `event_tx`.
pub async fn run_session(
    transport: Arc<dyn Transport>,
    mut incoming: mpsc::Receiver<Link>,
    mut cmd_rx: mpsc::Receiver<AppCommand>,
    event_tx: mpsc::Sender<AppEvent>,
) {
    let mut state = SessionState {
        transport,
        event_tx,
        active: None,
        receiver: FileReceiver::new(),
        sender: FileSender::new(),
    };
    let mut accepting = true;

    loop {
        let step = tokio::select! {
            cmd = cmd_rx.recv() => Step::Command(cmd),
            link = incoming.recv(), if accepting => Step::Incoming(link),
            event = state.next_link_event() => Step::Link(event),
        };

        match step {
            Step::Command(Some(cmd)) => state.handle_command(cmd).await,
            Step::Command(None) => break,
            Step::Incoming(Some(link)) => state.adopt(link),
            Step::Incoming(None) => {
                warn!("Transport stopped accepting connections");
                accepting = false;
            }
            Step::Link(event) => state.handle_link_event(event).await,
        }
    }

    if let Some(active) = state.active.take() {
        active.close();
    }
    info!("Session stopped");
}

/// Host-side handle to a running session
#[derive(Clone, Debug)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<AppCommand>,
}

impl SessionHandle {
    pub fn new(cmd_tx: mpsc::Sender<AppCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Connect to `remote_id`, closing any active connection first
    pub async fn connect(&self, remote_id: impl Into<String>) -> Result<(), TransferError> {
        self.cmd_tx
            .send(AppCommand::Connect {
                remote_id: remote_id.into(),
            })
            .await
            .map_err(|_| TransferError::SessionClosed)
    }

    /// Start streaming `source` to the connected peer.
    ///
    /// Returns once the transfer has been accepted; progress and completion
    /// arrive as events.
    pub async fn send_file(&self, source: Box<dyn FileSource>) -> Result<(), TransferError> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(AppCommand::SendFile { source, reply })
            .await
            .map_err(|_| TransferError::SessionClosed)?;
        response.await.map_err(|_| TransferError::SessionClosed)?
    }

    pub async fn disconnect(&self) -> Result<(), TransferError> {
        self.cmd_tx
            .send(AppCommand::Disconnect)
            .await
            .map_err(|_| TransferError::SessionClosed)
    }
}

/// Spawn a session task; returns its handle and the host event stream
pub fn spawn_session(
    transport: Arc<dyn Transport>,
    incoming: mpsc::Receiver<Link>,
    event_buffer: usize,
) -> (SessionHandle, mpsc::Receiver<AppEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(event_buffer);
    tokio::spawn(run_session(transport, incoming, cmd_rx, event_tx));
    (SessionHandle::new(cmd_tx), event_rx)
}
