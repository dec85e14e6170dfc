//! End-to-end session tests over the in-process transport.

use bytes::Bytes;
use pollen_core::transport::memory::MemoryNetwork;
use pollen_core::transport::{Link, LinkEvent, LinkSender, Transport};
use pollen_core::{
    AppEvent, CHUNK_SIZE, Direction, MemoryFile, ProtocolMessage, SessionHandle, TransferError,
    TransferMeta, spawn_session,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

struct Peer {
    handle: SessionHandle,
    events: mpsc::Receiver<AppEvent>,
}

fn peer(network: &MemoryNetwork, id: &str) -> Peer {
    peer_with_buffer(network, id, 1024)
}

/// Session whose host queue holds only `event_buffer` undelivered events
fn peer_with_buffer(network: &MemoryNetwork, id: &str, event_buffer: usize) -> Peer {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();

    let (transport, incoming) = network.register(id);
    let (handle, events) = spawn_session(Arc::new(transport), incoming, event_buffer);
    Peer { handle, events }
}

/// Collect events until one matches `done`; the matching event is last
async fn wait_for(
    events: &mut mpsc::Receiver<AppEvent>,
    done: impl Fn(&AppEvent) -> bool,
) -> Vec<AppEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(EVENT_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

/// Collect whatever arrives within `window`
async fn collect_for(events: &mut mpsc::Receiver<AppEvent>, window: Duration) -> Vec<AppEvent> {
    let mut seen = Vec::new();
    while let Ok(Some(event)) = timeout(window, events.recv()).await {
        seen.push(event);
    }
    seen
}

fn is_connected(e: &AppEvent) -> bool {
    matches!(e, AppEvent::Connected { .. })
}

fn is_completed(direction: Direction) -> impl Fn(&AppEvent) -> bool {
    move |e| matches!(e, AppEvent::TransferCompleted { direction: d, .. } if *d == direction)
}

async fn connected_pair(network: &MemoryNetwork) -> (Peer, Peer) {
    let mut alice = peer(network, "alice");
    let mut bob = peer(network, "bob");

    alice.handle.connect("bob").await.unwrap();
    let events = wait_for(&mut alice.events, is_connected).await;
    assert!(matches!(
        events.last(),
        Some(AppEvent::Connected { remote_id }) if remote_id == "bob"
    ));
    let events = wait_for(&mut bob.events, is_connected).await;
    assert!(matches!(
        events.last(),
        Some(AppEvent::Connected { remote_id }) if remote_id == "alice"
    ));

    (alice, bob)
}

async fn expect_open(link: &mut Link) -> Arc<dyn LinkSender> {
    match timeout(EVENT_TIMEOUT, link.next_event()).await {
        Ok(LinkEvent::Open(sender)) => sender,
        other => panic!("expected Open, got {:?}", other),
    }
}

async fn send_file_frames(to: &Arc<dyn LinkSender>, name: &str, data: &'static [u8]) {
    let meta = TransferMeta::new(name, data.len() as u64, "text/plain");
    let frames = [
        ProtocolMessage::Meta(meta),
        ProtocolMessage::Chunk {
            data: Bytes::from_static(data),
        },
        ProtocolMessage::End,
    ];
    for msg in frames {
        to.send(msg.encode().unwrap()).await.unwrap();
    }
}

fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[tokio::test]
async fn test_file_round_trip() {
    let network = MemoryNetwork::new();
    let (mut alice, mut bob) = connected_pair(&network).await;

    let data = sample_data(CHUNK_SIZE * 3 + 17);
    let source = MemoryFile::new("photo.png", "image/png", data.clone());
    alice.handle.send_file(Box::new(source)).await.unwrap();

    let sent = wait_for(&mut alice.events, is_completed(Direction::Send)).await;
    assert!(matches!(
        sent.first(),
        Some(AppEvent::TransferStarted {
            direction: Direction::Send,
            ..
        })
    ));

    let received = wait_for(&mut bob.events, is_completed(Direction::Receive)).await;
    match received.first() {
        Some(AppEvent::TransferStarted { meta, direction }) => {
            assert_eq!(*direction, Direction::Receive);
            assert_eq!(meta.name, "photo.png");
            assert_eq!(meta.size, data.len() as u64);
        }
        other => panic!("expected TransferStarted, got {:?}", other),
    }

    let fractions: Vec<f64> = received
        .iter()
        .filter_map(|e| match e {
            AppEvent::TransferProgress { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert_eq!(fractions.len(), 4);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(fractions.iter().filter(|&&f| f == 1.0).count(), 1);

    match received.last() {
        Some(AppEvent::TransferCompleted {
            payload: Some(file),
            meta,
            ..
        }) => {
            assert_eq!(&file.data[..], &data[..]);
            assert_eq!(meta.name, "photo.png");
            assert_eq!(file.mime(), "image/png");
        }
        other => panic!("expected payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_byte_round_trip() {
    let network = MemoryNetwork::new();
    let (alice, mut bob) = connected_pair(&network).await;

    let source = MemoryFile::new("empty.txt", "text/plain", Vec::new());
    alice.handle.send_file(Box::new(source)).await.unwrap();

    let received = wait_for(&mut bob.events, is_completed(Direction::Receive)).await;
    assert_eq!(received.len(), 2, "started + completed only: {:?}", received);
    match received.last() {
        Some(AppEvent::TransferCompleted {
            payload: Some(file),
            ..
        }) => assert!(file.data.is_empty()),
        other => panic!("expected empty payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_without_connection() {
    let network = MemoryNetwork::new();
    let mut alice = peer(&network, "alice");
    let (_bob_transport, mut bob_incoming) = network.register("bob");

    let source = MemoryFile::new("a.txt", "text/plain", b"hello".to_vec());
    let result = alice.handle.send_file(Box::new(source)).await;
    assert!(matches!(result, Err(TransferError::NoActiveConnection)));

    let events = wait_for(&mut alice.events, |e| matches!(e, AppEvent::Error(_))).await;
    assert_eq!(events.len(), 1);
    assert!(bob_incoming.try_recv().is_err(), "nothing reached bob");
}

#[tokio::test]
async fn test_second_send_is_rejected_while_streaming() {
    let network = MemoryNetwork::new();
    let (mut alice, mut bob) = connected_pair(&network).await;

    let big = MemoryFile::new("big.bin", "", sample_data(CHUNK_SIZE * 64));
    alice.handle.send_file(Box::new(big)).await.unwrap();

    let small = MemoryFile::new("small.txt", "text/plain", b"hi".to_vec());
    let result = alice.handle.send_file(Box::new(small)).await;
    assert!(matches!(
        result,
        Err(TransferError::TransferAlreadyInProgress)
    ));

    let received = wait_for(&mut bob.events, is_completed(Direction::Receive)).await;
    match received.last() {
        Some(AppEvent::TransferCompleted { meta, .. }) => assert_eq!(meta.name, "big.bin"),
        other => panic!("unexpected {:?}", other),
    }

    wait_for(&mut alice.events, is_completed(Direction::Send)).await;
    let again = MemoryFile::new("small.txt", "text/plain", b"hi".to_vec());
    alice.handle.send_file(Box::new(again)).await.unwrap();
    wait_for(&mut bob.events, is_completed(Direction::Receive)).await;
}

#[tokio::test]
async fn test_disconnect_mid_stream_abandons_transfer() {
    let network = MemoryNetwork::new();
    let (mut alice, mut bob) = connected_pair(&network).await;

    let big = MemoryFile::new("big.bin", "", sample_data(CHUNK_SIZE * 64));
    alice.handle.send_file(Box::new(big)).await.unwrap();
    alice.handle.disconnect().await.unwrap();

    let alice_events = wait_for(&mut alice.events, |e| {
        matches!(e, AppEvent::Disconnected)
    })
    .await;
    let bob_events = wait_for(&mut bob.events, |e| matches!(e, AppEvent::Disconnected)).await;

    let alice_tail = collect_for(&mut alice.events, Duration::from_millis(200)).await;
    let bob_tail = collect_for(&mut bob.events, Duration::from_millis(200)).await;

    for event in alice_events.iter().chain(&alice_tail) {
        assert!(!is_completed(Direction::Send)(event), "sender completed");
    }
    for event in bob_events.iter().chain(&bob_tail) {
        assert!(!is_completed(Direction::Receive)(event), "receiver completed");
    }

    let source = MemoryFile::new("a.txt", "text/plain", b"hello".to_vec());
    let result = alice.handle.send_file(Box::new(source)).await;
    assert!(matches!(result, Err(TransferError::NoActiveConnection)));
}

#[tokio::test]
async fn test_last_connector_wins() {
    let network = MemoryNetwork::new();
    let (mut alice, mut bob) = connected_pair(&network).await;
    let mut carol = peer(&network, "carol");

    carol.handle.connect("bob").await.unwrap();
    wait_for(&mut carol.events, is_connected).await;

    let events = wait_for(&mut bob.events, is_connected).await;
    assert!(matches!(
        events.last(),
        Some(AppEvent::Connected { remote_id }) if remote_id == "carol"
    ));
    wait_for(&mut alice.events, |e| matches!(e, AppEvent::Disconnected)).await;

    let source = MemoryFile::new("from-carol.txt", "text/plain", b"hey".to_vec());
    carol.handle.send_file(Box::new(source)).await.unwrap();
    let received = wait_for(&mut bob.events, is_completed(Direction::Receive)).await;
    match received.last() {
        Some(AppEvent::TransferCompleted {
            payload: Some(file),
            ..
        }) => assert_eq!(&file.data[..], b"hey"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_reconnect_replaces_active_connection() {
    let network = MemoryNetwork::new();
    let (mut alice, mut bob) = connected_pair(&network).await;
    let mut carol = peer(&network, "carol");

    alice.handle.connect("carol").await.unwrap();
    let events = wait_for(&mut alice.events, is_connected).await;
    assert!(matches!(
        events.last(),
        Some(AppEvent::Connected { remote_id }) if remote_id == "carol"
    ));
    wait_for(&mut carol.events, is_connected).await;
    wait_for(&mut bob.events, |e| matches!(e, AppEvent::Disconnected)).await;
}

#[tokio::test]
async fn test_connect_to_unknown_peer_disconnects() {
    let network = MemoryNetwork::new();
    let mut alice = peer(&network, "alice");

    alice.handle.connect("nobody").await.unwrap();
    let events = wait_for(&mut alice.events, |e| matches!(e, AppEvent::Disconnected)).await;
    assert!(!events.iter().any(is_connected));
}

#[tokio::test]
async fn test_protocol_noise_is_ignored() {
    let network = MemoryNetwork::new();
    let mut bob = peer(&network, "bob");
    let (mallory, _incoming) = network.register("mallory");

    let mut link = mallory.dial("bob");
    let to_bob = expect_open(&mut link).await;
    wait_for(&mut bob.events, is_connected).await;

    let noise = [
        Bytes::from_static(b"garbage"),
        Bytes::from_static(br#"{"type":"ping"}"#),
        Bytes::new(),
        ProtocolMessage::Chunk {
            data: Bytes::from_static(b"stray"),
        }
        .encode()
        .unwrap(),
        ProtocolMessage::End.encode().unwrap(),
    ];
    for frame in noise {
        to_bob.send(frame).await.unwrap();
    }

    let meta = TransferMeta::new("a.txt", 5, "text/plain");
    let real = [
        ProtocolMessage::Meta(meta),
        ProtocolMessage::Chunk {
            data: Bytes::from_static(b"hel"),
        },
        ProtocolMessage::Chunk {
            data: Bytes::from_static(b"lo"),
        },
        ProtocolMessage::End,
    ];
    for msg in real {
        to_bob.send(msg.encode().unwrap()).await.unwrap();
    }

    let events = wait_for(&mut bob.events, is_completed(Direction::Receive)).await;
    assert!(matches!(events[0], AppEvent::TransferStarted { .. }));
    let fractions: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            AppEvent::TransferProgress { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert_eq!(fractions, vec![0.6, 1.0]);
    match events.last() {
        Some(AppEvent::TransferCompleted {
            payload: Some(file),
            ..
        }) => assert_eq!(&file.data[..], b"hello"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_close_emits_disconnected() {
    let network = MemoryNetwork::new();
    let (mut alice, mut bob) = connected_pair(&network).await;

    bob.handle.disconnect().await.unwrap();
    wait_for(&mut bob.events, |e| matches!(e, AppEvent::Disconnected)).await;
    wait_for(&mut alice.events, |e| matches!(e, AppEvent::Disconnected)).await;

    let tail = collect_for(&mut alice.events, Duration::from_millis(100)).await;
    assert!(
        !tail.iter().any(|e| matches!(e, AppEvent::Disconnected)),
        "disconnect reported once"
    );
}

#[tokio::test]
async fn test_close_reaches_a_backed_up_receiver() {
    let network = MemoryNetwork::new();
    let mut alice = peer(&network, "alice");
    let mut bob = peer_with_buffer(&network, "bob", 1);

    alice.handle.connect("bob").await.unwrap();
    wait_for(&mut alice.events, is_connected).await;

    // Bob's host is not reading, so his session stalls and his link fills
    let big = MemoryFile::new("big.bin", "", sample_data(CHUNK_SIZE * 600));
    alice.handle.send_file(Box::new(big)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    alice.handle.disconnect().await.unwrap();
    wait_for(&mut alice.events, |e| matches!(e, AppEvent::Disconnected)).await;

    let bob_events = wait_for(&mut bob.events, |e| matches!(e, AppEvent::Disconnected)).await;
    assert!(!bob_events.iter().any(is_completed(Direction::Receive)));
}

#[tokio::test]
async fn test_inbound_file_interleaves_with_large_send() {
    let network = MemoryNetwork::new();
    let (mut alice, bob) = connected_pair(&network).await;

    let big = MemoryFile::new("big.bin", "", sample_data(CHUNK_SIZE * 256));
    alice.handle.send_file(Box::new(big)).await.unwrap();
    wait_for(&mut alice.events, |e| {
        matches!(
            e,
            AppEvent::TransferProgress {
                direction: Direction::Send,
                ..
            }
        )
    })
    .await;

    let reply = MemoryFile::new("reply.txt", "text/plain", b"pong".to_vec());
    bob.handle.send_file(Box::new(reply)).await.unwrap();

    let events = wait_for(&mut alice.events, is_completed(Direction::Receive)).await;
    assert!(
        !events.iter().any(is_completed(Direction::Send)),
        "inbound file waited for the whole outbound send"
    );
    match events.last() {
        Some(AppEvent::TransferCompleted {
            payload: Some(file),
            meta,
            ..
        }) => {
            assert_eq!(meta.name, "reply.txt");
            assert_eq!(&file.data[..], b"pong");
        }
        other => panic!("unexpected {:?}", other),
    }
    wait_for(&mut alice.events, is_completed(Direction::Send)).await;
}

#[tokio::test]
async fn test_inbound_reconnect_from_active_peer_replaces_link() {
    let network = MemoryNetwork::new();
    let mut bob = peer(&network, "bob");
    let (alice, _alice_incoming) = network.register("alice");

    let mut first = alice.dial("bob");
    let first_tx = expect_open(&mut first).await;
    wait_for(&mut bob.events, is_connected).await;

    // Half a file on the old link
    let stale = TransferMeta::new("stale.txt", 10, "text/plain");
    first_tx
        .send(ProtocolMessage::Meta(stale).encode().unwrap())
        .await
        .unwrap();

    let mut second = alice.dial("bob");
    let second_tx = expect_open(&mut second).await;
    let events = wait_for(&mut bob.events, is_connected).await;
    assert!(matches!(
        events.last(),
        Some(AppEvent::Connected { remote_id }) if remote_id == "alice"
    ));

    assert!(matches!(
        timeout(EVENT_TIMEOUT, first.next_event()).await,
        Ok(LinkEvent::Closed)
    ));
    assert!(!first_tx.is_open());
    assert!(second_tx.is_open());

    send_file_frames(&second_tx, "fresh.txt", b"fresh").await;
    let events = wait_for(&mut bob.events, is_completed(Direction::Receive)).await;
    assert!(!events.iter().any(|e| matches!(e, AppEvent::Disconnected)));
    match events.last() {
        Some(AppEvent::TransferCompleted {
            payload: Some(file),
            meta,
            ..
        }) => {
            assert_eq!(meta.name, "fresh.txt");
            assert_eq!(&file.data[..], b"fresh");
        }
        other => panic!("unexpected {:?}", other),
    }
}
