//! The contracts an embedding application implements to receive messages
//! and lifecycle notifications. Message payloads arrive already decrypted.

use crate::peer::Peer;

/// Callbacks for a [`UdpClient`](crate::UdpClient). The handlers run on
/// the client's listener thread, so long-running work should be handed
/// off rather than done inline.
pub trait ClientHandlers: Send + Sync {
    /// A text message arrived from the server.
    fn on_text_message(&self, message: String);

    /// A binary message arrived from the server.
    fn on_bytes_message(&self, message: Vec<u8>);

    fn on_start(&self) {}
    fn on_terminate(&self) {}
    fn on_pause(&self) {}
    fn on_resume(&self) {}
}

/// Callbacks for a [`UdpServer`](crate::UdpServer). Message handlers run
/// on listener-pool threads and may fire concurrently for different
/// datagrams. The [`Peer`] identifies the sender (address, port, key id)
/// with enough information to address a reply.
pub trait ServerHandlers: Send + Sync {
    /// A text message arrived from `peer`.
    fn on_text_message(&self, message: String, peer: &Peer);

    /// A binary message arrived from `peer`.
    fn on_bytes_message(&self, message: Vec<u8>, peer: &Peer);

    fn on_start(&self) {}
    fn on_terminate(&self) {}
    fn on_pause(&self) {}
    fn on_resume(&self) {}
}
