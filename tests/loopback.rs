//! End-to-end client/server scenarios over real loopback sockets.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use udp_courier::{
    ClientHandlers, CourierError, LifecycleState, Peer, ServerHandlers, UdpClient, UdpServer,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct ChannelClientHandlers {
    texts: Sender<String>,
    bytes: Sender<Vec<u8>>,
}

impl ClientHandlers for ChannelClientHandlers {
    fn on_text_message(&self, message: String) {
        let _ = self.texts.send(message);
    }

    fn on_bytes_message(&self, message: Vec<u8>) {
        let _ = self.bytes.send(message);
    }
}

struct ChannelServerHandlers {
    texts: Sender<(String, Peer)>,
    bytes: Sender<(Vec<u8>, Peer)>,
}

impl ServerHandlers for ChannelServerHandlers {
    fn on_text_message(&self, message: String, peer: &Peer) {
        let _ = self.texts.send((message, peer.clone()));
    }

    fn on_bytes_message(&self, message: Vec<u8>, peer: &Peer) {
        let _ = self.bytes.send((message, peer.clone()));
    }
}

struct Rig {
    server: UdpServer,
    client: UdpClient,
    server_texts: Receiver<(String, Peer)>,
    server_bytes: Receiver<(Vec<u8>, Peer)>,
    client_texts: Receiver<String>,
    client_bytes: Receiver<Vec<u8>>,
}

/// Bind a server on an ephemeral port, point a client at it, and start
/// both, with every handler callback mirrored into a channel.
fn start_rig(listener_count: usize) -> Rig {
    let (server_text_tx, server_texts) = channel();
    let (server_byte_tx, server_bytes) = channel();
    let server = UdpServer::listen(0, listener_count).unwrap();
    server
        .set_handlers(ChannelServerHandlers {
            texts: server_text_tx,
            bytes: server_byte_tx,
        })
        .unwrap();
    server.start().unwrap();
    let server_port = server.local_addr().unwrap().port();

    let (client_text_tx, client_texts) = channel();
    let (client_byte_tx, client_bytes) = channel();
    let client = UdpClient::connect("127.0.0.1", server_port).unwrap();
    client
        .set_handlers(ChannelClientHandlers {
            texts: client_text_tx,
            bytes: client_byte_tx,
        })
        .unwrap();
    client.start().unwrap();

    Rig {
        server,
        client,
        server_texts,
        server_bytes,
        client_texts,
        client_bytes,
    }
}

impl Rig {
    fn shutdown(self) {
        self.client.terminate().unwrap();
        self.server.terminate().unwrap();
        assert_eq!(self.client.state(), LifecycleState::Dead);
        assert_eq!(self.server.state(), LifecycleState::Dead);
    }
}

#[test]
fn keyed_ping_pong() {
    let key: [u8; 16] = core::array::from_fn(|i| i as u8);
    let rig = start_rig(4);
    rig.server.add_key("k1", key);
    rig.client.set_active_key("k1", key);

    rig.client.send_text("ping").unwrap();
    let (message, peer) = rig.server_texts.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message, "ping");
    assert_eq!(peer.key_id(), Some("k1"));
    assert_eq!(peer.port(), rig.client.local_addr().unwrap().port());

    rig.server.broadcast_text("pong").unwrap();
    let message = rig.client_texts.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message, "pong");

    rig.shutdown();
}

#[test]
fn unkeyed_binary_passes_through_unchanged() {
    let rig = start_rig(2);

    rig.client.send_bytes(&[0x01, 0x02]).unwrap();
    let (message, peer) = rig.server_bytes.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message, vec![0x01, 0x02]);
    assert_eq!(peer.key_id(), None);

    rig.server.broadcast_bytes(&[0x03]).unwrap();
    let message = rig.client_bytes.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message, vec![0x03]);

    rig.shutdown();
}

#[test]
fn missing_key_fails_before_any_datagram() {
    let rig = start_rig(2);
    rig.client.select_key("missing");

    let err = rig.client.send_text("never leaves").unwrap_err();
    assert!(matches!(err, CourierError::UnknownKey(id) if id == "missing"));

    // Nothing was transmitted, so the server hears nothing.
    assert!(rig
        .server_texts
        .recv_timeout(Duration::from_millis(200))
        .is_err());

    rig.shutdown();
}

#[test]
fn broadcasts_follow_a_peer_across_key_cycles() {
    let key1 = [1u8; 16];
    let key2 = [2u8; 32];
    let rig = start_rig(4);
    rig.server.add_key("k1", key1);
    rig.server.add_key("k2", key2);

    rig.client.set_active_key("k1", key1);
    rig.client.send_text("under k1").unwrap();
    let (message, peer) = rig.server_texts.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message, "under k1");
    assert_eq!(peer.key_id(), Some("k1"));

    // Cycle to a new key; the peer record follows the latest message.
    rig.client.set_active_key("k2", key2);
    rig.client.send_text("under k2").unwrap();
    let (message, peer) = rig.server_texts.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message, "under k2");
    assert_eq!(peer.key_id(), Some("k2"));

    // The broadcast is encrypted under k2 now; the client still decrypts
    // because the envelope names the key that protected it.
    rig.server.broadcast_text("keyed reply").unwrap();
    let message = rig.client_texts.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message, "keyed reply");

    rig.shutdown();
}

#[test]
fn paused_server_drops_and_resumed_server_hears_again() {
    let rig = start_rig(2);

    rig.server.pause().unwrap();
    rig.client.send_text("while paused").unwrap();
    assert!(rig
        .server_texts
        .recv_timeout(Duration::from_millis(200))
        .is_err());

    rig.server.resume().unwrap();
    rig.client.send_text("after resume").unwrap();

    // A datagram that was sitting in the OS buffer across the pause may
    // legitimately arrive first; only the post-resume message is
    // guaranteed.
    loop {
        let (message, _) = rig.server_texts.recv_timeout(RECV_TIMEOUT).unwrap();
        if message == "after resume" {
            break;
        }
    }

    rig.shutdown();
}

#[test]
fn operations_outside_their_lifecycle_window_fail() {
    let server = UdpServer::listen(0, 1).unwrap();
    assert_eq!(server.state(), LifecycleState::Initialized);

    // Starting before handlers are assigned is too early.
    assert!(matches!(
        server.start(),
        Err(CourierError::IllegalLifecycle { .. })
    ));

    let (text_tx, _texts) = channel();
    let (byte_tx, _bytes) = channel();
    server
        .set_handlers(ChannelServerHandlers {
            texts: text_tx,
            bytes: byte_tx,
        })
        .unwrap();
    assert_eq!(server.state(), LifecycleState::Ready);

    // Broadcasting before start is too early; starting twice is too late.
    assert!(matches!(
        server.broadcast_text("too early"),
        Err(CourierError::IllegalLifecycle { .. })
    ));
    server.start().unwrap();
    assert_eq!(server.state(), LifecycleState::Started);
    assert!(matches!(
        server.start(),
        Err(CourierError::IllegalLifecycle { .. })
    ));

    // Reconfiguring a started server is too late.
    let (text_tx, _texts) = channel();
    let (byte_tx, _bytes) = channel();
    assert!(matches!(
        server.set_handlers(ChannelServerHandlers {
            texts: text_tx,
            bytes: byte_tx,
        }),
        Err(CourierError::IllegalLifecycle { .. })
    ));

    server.terminate().unwrap();
    assert_eq!(server.state(), LifecycleState::Dead);

    // Everything is illegal once dead.
    assert!(server.pause().is_err());
    assert!(server.resume().is_err());
    assert!(server.terminate().is_err());
    assert!(server.broadcast_bytes(&[0]).is_err());
}

#[test]
fn client_send_requires_started() {
    let server = UdpServer::listen(0, 1).unwrap();
    let port = server.local_addr().unwrap().port();

    let client = UdpClient::connect("127.0.0.1", port).unwrap();
    assert!(matches!(
        client.send_text("too early"),
        Err(CourierError::IllegalLifecycle {
            required: LifecycleState::Started,
            actual: LifecycleState::Initialized,
        })
    ));

    let (text_tx, _texts) = channel();
    let (byte_tx, _bytes) = channel();
    client
        .set_handlers(ChannelClientHandlers {
            texts: text_tx,
            bytes: byte_tx,
        })
        .unwrap();
    assert!(client.send_text("still too early").is_err());

    client.start().unwrap();
    client.send_text("fine now").unwrap();
    client.terminate().unwrap();
    assert!(client.send_text("too late").is_err());
}
