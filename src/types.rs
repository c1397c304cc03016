//! Core types shared across the crate: the wire envelope and the error
//! taxonomy.

use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Largest datagram the listeners will receive and the largest encoded
/// envelope `encode_envelope` will produce. UDP cannot carry more in a
/// single datagram and this crate never fragments.
pub const MAX_DATAGRAM_BYTES: usize = 65535;

/// Discriminates which payload field of an [`Envelope`] is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    /// UTF-8 text. When the message is keyed, the wire form is the
    /// base64 of the ciphertext so it stays valid text.
    Text = 0x00,
    /// Raw bytes, transmitted as-is (ciphertext bytes when keyed).
    Binary = 0x01,
}

impl PayloadType {
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(PayloadType::Text),
            0x01 => Some(PayloadType::Binary),
            _ => None,
        }
    }
}

/// The message placed inside one UDP datagram.
///
/// Exactly one of `text_payload`/`binary_payload` is populated, selected
/// by `payload_type`. A `key_id` of `None` means no encryption was
/// applied to this message; the id itself travels in the clear, as it is
/// routing metadata, not a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub payload_type: PayloadType,
    pub text_payload: Option<String>,
    pub binary_payload: Option<Vec<u8>>,
    pub key_id: Option<String>,
}

impl Envelope {
    /// Create a text envelope.
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload_type: PayloadType::Text,
            text_payload: Some(payload.into()),
            binary_payload: None,
            key_id: None,
        }
    }

    /// Create a binary envelope.
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload_type: PayloadType::Binary,
            text_payload: None,
            binary_payload: Some(payload.into()),
            key_id: None,
        }
    }

    /// Tag the envelope with the id of the key that protects its payload.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }
}

/// Everything that can go wrong in this crate.
#[derive(Debug, Error)]
pub enum CourierError {
    /// An operation was attempted outside its lifecycle window. This is a
    /// programming error in the embedding application, not a condition to
    /// retry.
    #[error("operation requires lifecycle state {required} but instance is {actual}")]
    IllegalLifecycle {
        required: LifecycleState,
        actual: LifecycleState,
    },

    /// A key id was referenced that has no registered key bytes.
    #[error("no key registered for id {0:?}")]
    UnknownKey(String),

    /// A cipher operation failed. Callers never see partially decrypted
    /// output.
    #[error("cipher operation failed: {0}")]
    CryptoFailure(String),

    /// A buffer could not be decoded as an envelope, or an envelope could
    /// not legally exist on the wire (oversized).
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Socket I/O failed.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
}
