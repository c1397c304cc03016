//! Wire codec for [`Envelope`].
//!
//! The original protocol shipped a platform-native object graph in each
//! datagram; this crate defines the portable schema explicitly. All
//! integers are big-endian:
//!
//! ```text
//! u16  record length (number of bytes that follow)
//! u8   payload-type tag       0x00 = text, 0x01 = binary
//! u8   key-id presence flag   0x00 = unkeyed, 0x01 = keyed
//! u16  key id length   \  present only when the
//! [..] key id (UTF-8)  /  presence flag is 0x01
//! u16  payload length
//! [..] payload (UTF-8 when the tag is text, raw bytes when binary)
//! ```
//!
//! One envelope is one datagram: the encoded form never exceeds
//! [`MAX_DATAGRAM_BYTES`] and decoding never spans buffer boundaries.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;

use crate::types::{CourierError, Envelope, PayloadType, MAX_DATAGRAM_BYTES};

const TAG_KEYED: u8 = 0x01;
const TAG_UNKEYED: u8 = 0x00;

/// Serialize an envelope into the bytes of a single datagram.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CourierError> {
    let payload: &[u8] = match envelope.payload_type {
        PayloadType::Text => envelope
            .text_payload
            .as_deref()
            .map(str::as_bytes)
            .ok_or_else(|| malformed("text envelope without a text payload"))?,
        PayloadType::Binary => envelope
            .binary_payload
            .as_deref()
            .ok_or_else(|| malformed("binary envelope without a binary payload"))?,
    };

    let key_id = envelope.key_id.as_deref().unwrap_or("");
    let key_id_len = u16::try_from(key_id.len())
        .map_err(|_| malformed("key id longer than 65535 bytes"))?;
    let payload_len = u16::try_from(payload.len())
        .map_err(|_| malformed("payload longer than 65535 bytes"))?;

    let mut record_len = 1 + 1 + 2 + payload.len();
    if envelope.key_id.is_some() {
        record_len += 2 + key_id.len();
    }
    let total = 2 + record_len;
    if total > MAX_DATAGRAM_BYTES {
        return Err(malformed(format!(
            "encoded envelope is {total} bytes, above the {MAX_DATAGRAM_BYTES}-byte datagram ceiling"
        )));
    }

    let mut buf = Vec::with_capacity(total);
    buf.put_u16(record_len as u16);
    buf.put_u8(envelope.payload_type as u8);
    if envelope.key_id.is_some() {
        buf.put_u8(TAG_KEYED);
        buf.put_u16(key_id_len);
        buf.put_slice(key_id.as_bytes());
    } else {
        buf.put_u8(TAG_UNKEYED);
    }
    buf.put_u16(payload_len);
    buf.put_slice(payload);

    Ok(buf)
}

/// Decode the bytes of one received datagram back into an envelope.
pub fn try_decode_envelope(data: &[u8]) -> Result<Envelope, CourierError> {
    let mut cursor = Cursor::new(data);

    let record_len = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| malformed("datagram shorter than the record length prefix"))?
        as usize;
    if data.len() - 2 != record_len {
        return Err(malformed(format!(
            "record length {record_len} does not match the {} remaining bytes",
            data.len() - 2
        )));
    }

    let tag = read_u8(&mut cursor)?;
    let payload_type = PayloadType::from_tag(tag)
        .ok_or_else(|| malformed(format!("unknown payload-type tag 0x{tag:02x}")))?;

    let key_id = match read_u8(&mut cursor)? {
        TAG_UNKEYED => None,
        TAG_KEYED => {
            let len = cursor
                .read_u16::<BigEndian>()
                .map_err(|_| malformed("truncated key id length"))? as usize;
            let raw = read_bytes(&mut cursor, len, "key id")?;
            Some(
                String::from_utf8(raw)
                    .map_err(|_| malformed("key id is not valid UTF-8"))?,
            )
        }
        flag => return Err(malformed(format!("unknown key-id flag 0x{flag:02x}"))),
    };

    let payload_len = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| malformed("truncated payload length"))? as usize;
    let payload = read_bytes(&mut cursor, payload_len, "payload")?;
    if cursor.position() as usize != data.len() {
        return Err(malformed("trailing bytes after the payload"));
    }

    let (text_payload, binary_payload) = match payload_type {
        PayloadType::Text => (
            Some(
                String::from_utf8(payload)
                    .map_err(|_| malformed("text payload is not valid UTF-8"))?,
            ),
            None,
        ),
        PayloadType::Binary => (None, Some(payload)),
    };

    Ok(Envelope {
        payload_type,
        text_payload,
        binary_payload,
        key_id,
    })
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, CourierError> {
    cursor.read_u8().map_err(|_| malformed("truncated record"))
}

fn read_bytes(
    cursor: &mut Cursor<&[u8]>,
    len: usize,
    what: &str,
) -> Result<Vec<u8>, CourierError> {
    let mut raw = vec![0u8; len];
    cursor
        .read_exact(&mut raw)
        .map_err(|_| malformed(format!("truncated {what}")))?;
    Ok(raw)
}

fn malformed(reason: impl Into<String>) -> CourierError {
    CourierError::MalformedEnvelope(reason.into())
}
