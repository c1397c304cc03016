//! Managed UDP socket acting as a client to one server endpoint.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::ClientHandlers;
use crate::crypto;
use crate::envelope::encode_envelope;
use crate::keyring::KeyRing;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::listener::{spawn_listener, ListenerHandle};
use crate::lock::ResourceLock;
use crate::types::{CourierError, Envelope, PayloadType};

/// A lifecycle-managed UDP client.
///
/// Construction order mirrors the lifecycle: [`connect`](Self::connect)
/// (Initialized), [`set_handlers`](Self::set_handlers) (Ready),
/// [`start`](Self::start) (Started), then [`send_text`](Self::send_text)/
/// [`send_bytes`](Self::send_bytes) until [`terminate`](Self::terminate)
/// (Dead). Termination is not reversible; build a new client to
/// reconnect.
///
/// The client holds at most one *active* key at a time, selected by id.
/// Outbound messages are encrypted under it and tagged with its id;
/// inbound messages are decrypted with whatever provisioned key their
/// envelope names, which keeps receipt working across a key cycle.
pub struct UdpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    lifecycle: Lifecycle,
    keys: KeyRing,
    active_key_id: ResourceLock<Option<String>>,
    handlers: ResourceLock<Option<Arc<dyn ClientHandlers>>>,
    listener: Arc<ListenerHandle>,
    listener_join: ResourceLock<Option<JoinHandle<()>>>,
}

impl UdpClient {
    /// Resolve the server endpoint and bind a local socket. The OS-level
    /// connect happens at [`start`](Self::start).
    pub fn connect(host: &str, port: u16) -> Result<Self, CourierError> {
        let remote = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                CourierError::Transport(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("host {host:?} did not resolve to any address"),
                ))
            })?;
        let bind_addr = SocketAddr::new(
            if remote.is_ipv4() {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            } else {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            },
            0,
        );
        let socket = UdpSocket::bind(bind_addr)?;
        debug!("client socket bound to {}", socket.local_addr()?);

        Ok(Self {
            inner: Arc::new(ClientInner {
                socket: Arc::new(socket),
                remote,
                lifecycle: Lifecycle::new(),
                keys: KeyRing::new(),
                active_key_id: ResourceLock::new(None),
                handlers: ResourceLock::new(None),
                listener: Arc::new(ListenerHandle::new()),
                listener_join: ResourceLock::new(None),
            }),
        })
    }

    /// The local address of the client socket.
    pub fn local_addr(&self) -> Result<SocketAddr, CourierError> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.current()
    }

    /// Provision a key and make it the active one for outbound messages.
    ///
    /// Callable at any lifecycle stage. Cycle keys often: the cipher uses
    /// a fixed IV, so key freshness is the only thing limiting ciphertext
    /// reuse (see [`crate::crypto`]).
    pub fn set_active_key(&self, id: impl Into<String>, key: impl Into<Vec<u8>>) {
        let id = id.into();
        self.inner.keys.add_key(id.clone(), key);
        self.inner
            .active_key_id
            .run_with_lock(|active| *active = Some(id));
    }

    /// Switch the active key by id without provisioning bytes. If the id
    /// was never provisioned, the next send fails with
    /// [`CourierError::UnknownKey`] before any datagram goes out.
    pub fn select_key(&self, id: impl Into<String>) {
        let id = id.into();
        self.inner
            .active_key_id
            .run_with_lock(|active| *active = Some(id));
    }

    /// Assign the message/lifecycle callbacks and become Ready.
    pub fn set_handlers(&self, handlers: impl ClientHandlers + 'static) -> Result<(), CourierError> {
        self.inner.lifecycle.require_at_most(LifecycleState::Ready)?;
        self.inner
            .handlers
            .run_with_lock(|slot| *slot = Some(Arc::new(handlers)));
        self.inner.lifecycle.advance(LifecycleState::Ready);
        Ok(())
    }

    /// Connect the socket to the configured endpoint (fixing the send
    /// destination and filtering unsolicited datagrams at the OS level),
    /// launch the listener, and become Started.
    pub fn start(&self) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Ready)?;

        self.inner.socket.connect(self.inner.remote)?;

        let dispatch_target = Arc::clone(&self.inner);
        let join = spawn_listener(
            Arc::clone(&self.inner.socket),
            Arc::clone(&self.inner.listener),
            move |envelope, _from| dispatch_target.handle_incoming(envelope),
        );
        self.inner
            .listener_join
            .run_with_lock(|slot| *slot = Some(join));
        self.inner.listener.start_listen();

        self.inner.lifecycle.advance(LifecycleState::Started);
        info!("client started, connected to {}", self.inner.remote);
        if let Some(handlers) = self.inner.handlers() {
            handlers.on_start();
        }
        Ok(())
    }

    /// Stop the listener from consuming datagrams. The thread stays up
    /// and [`resume`](Self::resume) restarts consumption.
    pub fn pause(&self) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;
        self.inner.listener.stop_listen();
        if let Some(handlers) = self.inner.handlers() {
            handlers.on_pause();
        }
        Ok(())
    }

    /// Resume a paused listener.
    pub fn resume(&self) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;
        self.inner.listener.start_listen();
        if let Some(handlers) = self.inner.handlers() {
            handlers.on_resume();
        }
        Ok(())
    }

    /// Pause, kill the listener, tear the socket down, and become Dead.
    pub fn terminate(&self) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;

        self.pause()?;
        self.inner.listener.kill();

        // Unblock a listener stuck in recv_from. The socket is connected,
        // so shutdown reaches it; the listener treats the resulting
        // zero-length read or error as the teardown signal.
        if let Err(err) =
            socket2::SockRef::from(&*self.inner.socket).shutdown(std::net::Shutdown::Both)
        {
            debug!("socket shutdown during terminate: {err}");
        }
        if let Some(join) = self.inner.listener_join.run_with_lock(|slot| slot.take()) {
            if join.join().is_err() {
                warn!("client listener thread panicked before join");
            }
        }

        if let Some(handlers) = self.inner.handlers() {
            handlers.on_terminate();
        }
        self.inner.lifecycle.advance(LifecycleState::Dead);
        info!("client terminated");
        Ok(())
    }

    /// Send one text message to the server, encrypted under the active
    /// key when one is selected.
    pub fn send_text(&self, text: &str) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;
        let key = self.inner.active_key()?;
        let envelope = crypto::seal_text(text, borrow_key(&key))?;
        self.send_envelope(&envelope)
    }

    /// Send one binary message to the server, encrypted under the active
    /// key when one is selected.
    pub fn send_bytes(&self, bytes: &[u8]) -> Result<(), CourierError> {
        self.inner.lifecycle.require_exactly(LifecycleState::Started)?;
        let key = self.inner.active_key()?;
        let envelope = crypto::seal_bytes(bytes, borrow_key(&key))?;
        self.send_envelope(&envelope)
    }

    fn send_envelope(&self, envelope: &Envelope) -> Result<(), CourierError> {
        let encoded = encode_envelope(envelope)?;
        self.inner.socket.send(&encoded)?;
        Ok(())
    }
}

fn borrow_key(key: &Option<(String, Vec<u8>)>) -> Option<(&str, &[u8])> {
    key.as_ref().map(|(id, bytes)| (id.as_str(), bytes.as_slice()))
}

impl ClientInner {
    fn handlers(&self) -> Option<Arc<dyn ClientHandlers>> {
        self.handlers.run_with_lock(|slot| slot.clone())
    }

    /// Resolve the active key id to its bytes. `Ok(None)` means the
    /// unencrypted path; a selected-but-unprovisioned id is
    /// [`CourierError::UnknownKey`].
    fn active_key(&self) -> Result<Option<(String, Vec<u8>)>, CourierError> {
        let id = self.active_key_id.run_with_lock(|active| active.clone());
        match id {
            None => Ok(None),
            Some(id) => {
                let bytes = self
                    .keys
                    .key_for_id(Some(&id))?
                    .ok_or_else(|| CourierError::UnknownKey(id.clone()))?;
                Ok(Some((id, bytes)))
            }
        }
    }

    /// Entry point for the listener thread: decrypt (when keyed) and hand
    /// the plaintext to the configured handlers. Mirrors the server's
    /// handling exactly: the envelope's own key id picks the key.
    fn handle_incoming(&self, envelope: Envelope) -> Result<(), CourierError> {
        self.lifecycle.require_exactly(LifecycleState::Started)?;

        let key = self.keys.key_for_id(envelope.key_id.as_deref())?;
        let handlers = self.handlers();
        match envelope.payload_type {
            PayloadType::Binary => {
                let plaintext = crypto::open_bytes(&envelope, key.as_deref())?;
                if let Some(handlers) = handlers {
                    handlers.on_bytes_message(plaintext);
                }
            }
            PayloadType::Text => {
                let plaintext = crypto::open_text(&envelope, key.as_deref())?;
                if let Some(handlers) = handlers {
                    handlers.on_text_message(plaintext);
                }
            }
        }
        Ok(())
    }
}
