//! Server-side bookkeeping about remote peers.
//!
//! UDP is connectionless, so a "peer" is nothing more than a socket
//! address the server has received at least one datagram from, plus the
//! key id that peer most recently used. Records are created lazily on
//! first contact and live for the lifetime of the server.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// What the server knows about one remote endpoint. Handed to
/// [`ServerHandlers`](crate::ServerHandlers) callbacks so a handler can
/// address a reply without seeing the registry itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    addr: SocketAddr,
    key_id: Option<String>,
}

impl Peer {
    pub fn address(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The key id on the peer's most recent message, if any. Server-
    /// initiated sends to this peer are encrypted under this key.
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }
}

/// Append-only map of every peer the server has heard from. Identity is
/// the full (address, port) pair.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<SocketAddr, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Look up the record for `addr`, creating it on first contact. The
    /// stored key id is overwritten on every call so a peer can switch
    /// keys message-to-message and later broadcasts follow along.
    pub fn get_or_create(&mut self, addr: SocketAddr, key_id: Option<&str>) -> Peer {
        let record = self.peers.entry(addr).or_insert_with(|| Peer {
            addr,
            key_id: None,
        });
        record.key_id = key_id.map(str::to_string);
        record.clone()
    }

    /// Snapshot of every known peer, for broadcast iteration.
    pub fn all(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
