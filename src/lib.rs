//! # udp-courier
//!
//! Managed peer messaging directly on UDP datagrams: a client that talks
//! to one server endpoint, a server that talks to many clients, both
//! wrapped in a lifecycle state machine with optional per-key symmetric
//! encryption of payloads.
//!
//! * **One socket, many listeners**: the server runs a pool of OS
//!   threads all blocked in `recv_from` on the same socket; the OS hands
//!   each datagram to exactly one of them.
//! * **Lifecycle gated**: `Initialized -> Ready -> Started -> Dead`, one
//!   direction only; every operation declares the single state it is
//!   legal in.
//! * **Keyed transparently**: messages tagged with a key id are
//!   AES-CBC encrypted on send and decrypted on receipt; untagged
//!   messages pass through raw. Peers can switch keys message-to-message.
//! * **Datagram semantics preserved**: no retransmission, no ordering,
//!   no fragmentation; one envelope is one datagram.
//!
//! ## Quick start
//!
//! ```rust
//! use udp_courier::{encode_envelope, try_decode_envelope, Envelope};
//!
//! let envelope = Envelope::text("hello, courier!").with_key_id("k1");
//! let encoded = encode_envelope(&envelope)?;
//! let decoded = try_decode_envelope(&encoded)?;
//! assert_eq!(envelope, decoded);
//! # Ok::<(), udp_courier::CourierError>(())
//! ```
//!
//! ## Wire format
//!
//! Each datagram carries exactly one envelope (big-endian integers):
//!
//! - RECORD_LEN (2B): length of everything that follows
//! - TYPE (1B): payload type (`0x00` text, `0x01` binary)
//! - KEYED (1B): key-id presence flag (`0x00`/`0x01`)
//! - KEY_ID (2B length + UTF-8): present only when KEYED is `0x01`
//! - PAYLOAD (2B length + bytes): UTF-8 when TYPE is text, raw otherwise
//!
//! Total encoded size never exceeds 65535 bytes, the single-datagram
//! ceiling.
//!
//! ## Roles
//!
//! | Operation      | Client                        | Server                             |
//! |----------------|-------------------------------|------------------------------------|
//! | construct      | `connect(host, port)`         | `listen(port, listener_count)`     |
//! | provision keys | `set_active_key`/`select_key` | `add_key`                          |
//! | configure      | `set_handlers` (→ Ready)      | `set_handlers` (→ Ready)           |
//! | run            | `start` (→ Started)           | `start` (→ Started)                |
//! | send           | `send_text`/`send_bytes`      | `broadcast_text`/`broadcast_bytes` |
//! | suspend        | `pause`/`resume`              | `pause`/`resume`                   |
//! | finish         | `terminate` (→ Dead)          | `terminate` (→ Dead)               |
//!
//! ## Security note
//!
//! The cipher uses a fixed initialization vector shared by every message,
//! kept for compatibility with the original wire format. Identical
//! plaintext prefixes under one key produce identical ciphertext
//! prefixes; cycle keys frequently, or do not treat the encryption as
//! more than obfuscation. See [`crypto`] for details.

pub mod client;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod keyring;
pub mod lifecycle;
mod listener;
pub mod lock;
pub mod peer;
pub mod server;
pub mod types;

pub use client::UdpClient;
pub use config::{ClientHandlers, ServerHandlers};
pub use envelope::{encode_envelope, try_decode_envelope};
pub use keyring::KeyRing;
pub use lifecycle::LifecycleState;
pub use lock::{ResourceGuard, ResourceLock};
pub use peer::{Peer, PeerRegistry};
pub use server::{UdpServer, DEFAULT_LISTENER_COUNT};
pub use types::{CourierError, Envelope, PayloadType, MAX_DATAGRAM_BYTES};
