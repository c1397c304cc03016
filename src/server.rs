//! Managed UDP socket acting as a server to many clients.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::ServerHandlers;
use crate::crypto;
use crate::envelope::encode_envelope;
use crate::keyring::KeyRing;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::listener::{spawn_listener, ListenerHandle};
use crate::lock::ResourceLock;
use crate::peer::{Peer, PeerRegistry};
use crate::types::{CourierError, Envelope, PayloadType};

/// Listener-pool size when the embedding application has no opinion.
pub const DEFAULT_LISTENER_COUNT: usize = 30;

/// A lifecycle-managed UDP server.
///
/// One socket, a pool of listener threads blocked on it concurrently:
/// the OS delivers each incoming datagram to exactly one of them, which
/// parallelizes decode and dispatch under load without per-client sockets
/// or a demultiplexing thread.
///
/// Peers are tracked lazily by (address, port) on first contact, along
/// with the key id on their most recent message; [`broadcast_text`](
/// Self::broadcast_text)/[`broadcast_bytes`](Self::broadcast_bytes)
/// encrypt per peer under that sticky key id.
pub struct UdpServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    socket: Arc<UdpSocket>,
    lifecycle: Lifecycle,
    keys: KeyRing,
    peers: ResourceLock<PeerRegistry>,
    handlers: ResourceLock<Option<Arc<dyn ServerHandlers>>>,
    listeners: Vec<Arc<ListenerHandle>>,
    listener_joins: ResourceLock<Vec<JoinHandle<()>>>,
}

impl UdpServer {
    /// Bind the server socket and size the listener pool. Threads are
    /// launched at [`start`](Self::start).
    pub fn listen(port: u16, listener_count: usize) -> Result<Self, CourierError> {
        let socket = UdpSocket::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
        ))?;
        let listener_count = listener_count.max(1);
        let listeners = (0..listener_count)
            .map(|_| Arc::new(ListenerHandle::new()))
            .collect();
        info!(
            "server bound to {} with {listener_count} listeners",
            socket.local_addr()?
        );

        Ok(Self {
            inner: Arc::new(ServerInner {
                socket: Arc::new(socket),
                lifecycle: Lifecycle::new(),
                keys: KeyRing::new(),
                peers: ResourceLock::new(PeerRegistry::new()),
                handlers: ResourceLock::new(None),
                listeners,
                listener_joins: ResourceLock::new(Vec::new()),
            }),
        })
    }

    /// The local address of the server socket.
    pub fn local_addr(&self) -> Result<SocketAddr, CourierError> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.current()
    }

    /// Register key bytes under an id. Callable at any lifecycle stage;
    /// clients name one of these ids on their messages.
    pub fn add_key(&self, id: impl Into<String>, key: impl Into<Vec<u8>>) {
        self.inner.keys.add_key(id, key);
    }

    /// Assign the message/lifecycle callbacks and become Ready.
    pub fn set_handlers(&self, handlers: impl ServerHandlers + 'static) -> Result<(), CourierError> {
        self.inner.lifecycle.require_at_most(LifecycleState::Ready)?;
        self.inner
            .handlers
            .run_with_lock(|slot| *slot = Some(Arc::new(handlers)));
        self.inner.lifecycle.advance(LifecycleState::Ready);
        Ok(())
    }

    /// Launch and enable every pooled listener and become Started.
    pub fn start(&self) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Ready)?;

        for handle in &self.inner.listeners {
            let dispatch_target = Arc::clone(&self.inner);
            let join = spawn_listener(
                Arc::clone(&self.inner.socket),
                Arc::clone(handle),
                move |envelope, from| dispatch_target.handle_incoming(envelope, from),
            );
            self.inner
                .listener_joins
                .run_with_lock(|joins| joins.push(join));
            handle.start_listen();
        }

        self.inner.lifecycle.advance(LifecycleState::Started);
        info!("server started");
        if let Some(handlers) = self.inner.handlers() {
            handlers.on_start();
        }
        Ok(())
    }

    /// Stop every listener from consuming datagrams; threads stay up.
    pub fn pause(&self) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;
        for handle in &self.inner.listeners {
            handle.stop_listen();
        }
        if let Some(handlers) = self.inner.handlers() {
            handlers.on_pause();
        }
        Ok(())
    }

    /// Resume every paused listener.
    pub fn resume(&self) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;
        for handle in &self.inner.listeners {
            handle.start_listen();
        }
        if let Some(handlers) = self.inner.handlers() {
            handlers.on_resume();
        }
        Ok(())
    }

    /// Pause, kill the pool, tear the socket down, and become Dead.
    pub fn terminate(&self) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;

        self.pause()?;
        for handle in &self.inner.listeners {
            handle.kill();
        }
        self.wake_blocked_listeners();

        let joins = self
            .inner
            .listener_joins
            .run_with_lock(std::mem::take);
        for join in joins {
            if join.join().is_err() {
                warn!("server listener thread panicked before join");
            }
        }

        if let Some(handlers) = self.inner.handlers() {
            handlers.on_terminate();
        }
        self.inner.lifecycle.advance(LifecycleState::Dead);
        info!("server terminated");
        Ok(())
    }

    /// Broadcast one text message to every known peer, each encrypted
    /// under that peer's own last-used key. A failure for one peer never
    /// prevents delivery to the rest.
    pub fn broadcast_text(&self, text: &str) -> Result<(), CourierError> {
        self.broadcast(|key| crypto::seal_text(text, key))
    }

    /// Broadcast one binary message to every known peer, each encrypted
    /// under that peer's own last-used key.
    pub fn broadcast_bytes(&self, bytes: &[u8]) -> Result<(), CourierError> {
        self.broadcast(|key| crypto::seal_bytes(bytes, key))
    }

    fn broadcast(
        &self,
        seal: impl Fn(Option<(&str, &[u8])>) -> Result<Envelope, CourierError>,
    ) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;

        let peers = self.inner.peers.run_with_lock(|registry| registry.all());
        debug!("broadcasting to {} peers", peers.len());
        for peer in peers {
            if let Err(err) = self.send_to_peer(&peer, &seal) {
                warn!("broadcast to {} failed: {err}", peer.socket_addr());
            }
        }
        Ok(())
    }

    fn send_to_peer(
        &self,
        peer: &Peer,
        seal: &impl Fn(Option<(&str, &[u8])>) -> Result<Envelope, CourierError>,
    ) -> Result<(), CourierError> {
        let key = self.inner.keys.key_for_id(peer.key_id())?;
        let envelope = seal(match (peer.key_id(), key.as_deref()) {
            (Some(id), Some(bytes)) => Some((id, bytes)),
            _ => None,
        })?;
        let encoded = encode_envelope(&envelope)?;
        self.inner.socket.send_to(&encoded, peer.socket_addr())?;
        Ok(())
    }

    /// Listeners blocked in `recv_from` notice the kill flag only once
    /// the receive returns. `shutdown(2)` is not reliable on an
    /// unconnected UDP socket, so poke each of them with a zero-length
    /// datagram instead; the kill flags are already set, so every wake
    /// exits one listener.
    fn wake_blocked_listeners(&self) {
        let Ok(mut target) = self.inner.socket.local_addr() else {
            return;
        };
        if target.ip().is_unspecified() {
            target.set_ip(match target.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        let waker = match UdpSocket::bind(SocketAddr::new(
            match target.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            },
            0,
        )) {
            Ok(socket) => socket,
            Err(err) => {
                warn!("could not bind wake socket during terminate: {err}");
                return;
            }
        };
        for _ in 0..self.inner.listeners.len() {
            if let Err(err) = waker.send_to(&[], target) {
                warn!("listener wake during terminate failed: {err}");
            }
        }
    }
}

impl ServerInner {
    fn handlers(&self) -> Option<Arc<dyn ServerHandlers>> {
        self.handlers.run_with_lock(|slot| slot.clone())
    }

    /// Entry point for the listener pool: resolve or create the sending
    /// peer (updating its sticky key id), decrypt when keyed, and hand
    /// the plaintext plus the peer to the configured handlers.
    fn handle_incoming(&self, envelope: Envelope, from: SocketAddr) -> Result<(), CourierError> {
        self.lifecycle.require_exactly(LifecycleState::Started)?;

        let peer = self
            .peers
            .run_with_lock(|registry| registry.get_or_create(from, envelope.key_id.as_deref()));

        let key = self.keys.key_for_id(peer.key_id())?;
        let handlers = self.handlers();
        match envelope.payload_type {
            PayloadType::Binary => {
                let plaintext = crypto::open_bytes(&envelope, key.as_deref())?;
                if let Some(handlers) = handlers {
                    handlers.on_bytes_message(plaintext, &peer);
                }
            }
            PayloadType::Text => {
                let plaintext = crypto::open_text(&envelope, key.as_deref())?;
                if let Some(handlers) = handlers {
                    handlers.on_text_message(plaintext, &peer);
                }
            }
        }
        Ok(())
    }
}
