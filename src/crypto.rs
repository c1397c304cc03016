//! Symmetric payload encryption: AES in CBC mode with PKCS7 padding.
//!
//! The initialization vector is fixed and shared by every message under
//! every key. That is a deliberate wire-compatibility choice inherited
//! from the protocol this crate implements, and it is the known weakness
//! of the scheme: two messages encrypted under the same key with the same
//! leading blocks produce the same leading ciphertext. Callers are
//! expected to cycle keys frequently (see
//! [`UdpClient::select_key`](crate::UdpClient::select_key)). A hardened
//! variant would carry a per-message nonce in the envelope instead.
//!
//! Failures never yield partial output: any key-length, padding, or
//! ciphertext problem surfaces as [`CourierError::CryptoFailure`].

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::types::{CourierError, Envelope};

/// Fixed IV shared by all messages. Byte-for-byte the value peers on the
/// original wire expect.
const STATIC_IV: [u8; 16] = [
    0x05, 0x0d, 0x0d, 0x07, 0x6b, 0x09, 0x02, 0x48, 0x06, 0x7e, 0x5e, 0x1b, 0x1d, 0x23, 0x1e, 0x13,
];

/// Encrypt `plaintext` under `key` (16, 24, or 32 bytes).
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CourierError> {
    match key.len() {
        16 => Ok(cbc::Encryptor::<Aes128>::new_from_slices(key, &STATIC_IV)
            .map_err(|e| CourierError::CryptoFailure(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        24 => Ok(cbc::Encryptor::<Aes192>::new_from_slices(key, &STATIC_IV)
            .map_err(|e| CourierError::CryptoFailure(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        32 => Ok(cbc::Encryptor::<Aes256>::new_from_slices(key, &STATIC_IV)
            .map_err(|e| CourierError::CryptoFailure(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        other => Err(CourierError::CryptoFailure(format!(
            "unsupported AES key length {other}, expected 16, 24, or 32 bytes"
        ))),
    }
}

/// Decrypt `ciphertext` under `key` (16, 24, or 32 bytes).
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CourierError> {
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, &STATIC_IV)
            .map_err(|e| CourierError::CryptoFailure(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| bad_ciphertext()),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, &STATIC_IV)
            .map_err(|e| CourierError::CryptoFailure(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| bad_ciphertext()),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, &STATIC_IV)
            .map_err(|e| CourierError::CryptoFailure(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| bad_ciphertext()),
        other => Err(CourierError::CryptoFailure(format!(
            "unsupported AES key length {other}, expected 16, 24, or 32 bytes"
        ))),
    }
}

fn bad_ciphertext() -> CourierError {
    CourierError::CryptoFailure("ciphertext corrupted or padding invalid".into())
}

/// Build an outbound text envelope. With a key the plaintext is UTF-8
/// encoded, encrypted, then base64 encoded so the wire payload stays
/// valid text; without one it travels as-is.
pub(crate) fn seal_text(
    text: &str,
    key: Option<(&str, &[u8])>,
) -> Result<Envelope, CourierError> {
    Ok(match key {
        Some((id, key)) => {
            let ciphertext = encrypt(text.as_bytes(), key)?;
            Envelope::text(BASE64.encode(ciphertext)).with_key_id(id)
        }
        None => Envelope::text(text),
    })
}

/// Build an outbound binary envelope; ciphertext travels as raw bytes.
pub(crate) fn seal_bytes(
    bytes: &[u8],
    key: Option<(&str, &[u8])>,
) -> Result<Envelope, CourierError> {
    Ok(match key {
        Some((id, key)) => Envelope::binary(encrypt(bytes, key)?).with_key_id(id),
        None => Envelope::binary(bytes),
    })
}

/// Recover the plaintext of an inbound text envelope.
pub(crate) fn open_text(
    envelope: &Envelope,
    key: Option<&[u8]>,
) -> Result<String, CourierError> {
    let payload = envelope
        .text_payload
        .as_deref()
        .ok_or_else(|| CourierError::MalformedEnvelope("text envelope without a text payload".into()))?;
    match key {
        Some(key) => {
            let ciphertext = BASE64.decode(payload).map_err(|_| {
                CourierError::CryptoFailure("keyed text payload is not valid base64".into())
            })?;
            let plaintext = decrypt(&ciphertext, key)?;
            String::from_utf8(plaintext).map_err(|_| {
                CourierError::CryptoFailure("decrypted text is not valid UTF-8".into())
            })
        }
        None => Ok(payload.to_string()),
    }
}

/// Recover the plaintext of an inbound binary envelope.
pub(crate) fn open_bytes(
    envelope: &Envelope,
    key: Option<&[u8]>,
) -> Result<Vec<u8>, CourierError> {
    let payload = envelope
        .binary_payload
        .as_deref()
        .ok_or_else(|| {
            CourierError::MalformedEnvelope("binary envelope without a binary payload".into())
        })?;
    match key {
        Some(key) => decrypt(payload, key),
        None => Ok(payload.to_vec()),
    }
}
