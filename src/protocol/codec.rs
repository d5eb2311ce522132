//! Binary packet codec (§3, §4.A).
//!
//! Wire layout, in order: `version(1) type(1) ttl(1) timestamp_ms(8,BE)
//! flags(1) payload_length(2,BE) sender_id(8) [recipient_id(8)] payload(N)`.
//! All multi-byte integers are big-endian.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::constants::*;
use super::error::{CodecError, CodecResult};
use super::{NodeId, Packet};

/// Encode `packet` to its wire representation.
///
/// When `pad` is true, the payload is block-padded (§4.B) before the
/// compression decision is made, so a padded-but-incompressible payload
/// still gets a chance to shrink back down via zlib.
pub fn encode(packet: &Packet, pad: bool) -> CodecResult<Vec<u8>> {
    if packet.sender_id.len() != NODE_ID_SIZE {
        return Err(CodecError::InvalidField(format!(
            "sender_id must be {NODE_ID_SIZE} bytes"
        )));
    }
    if let Some(recipient) = &packet.recipient_id {
        if recipient.len() != RECIPIENT_ID_SIZE {
            return Err(CodecError::InvalidField(format!(
                "recipient_id must be {RECIPIENT_ID_SIZE} bytes"
            )));
        }
    }

    let base_payload = if pad {
        super::padding::pad(&packet.payload)
    } else {
        packet.payload.clone()
    };

    let mut flags = 0u8;
    if packet.recipient_id.is_some() {
        flags |= FLAG_RECIPIENT_PRESENT;
    }

    let wire_payload = if base_payload.len() >= COMPRESSION_THRESHOLD_BYTES {
        match compress(&base_payload) {
            Some(compressed) if compressed.len() < base_payload.len() => {
                flags |= FLAG_COMPRESSED;
                let mut framed = Vec::with_capacity(4 + compressed.len());
                framed.write_u32::<BigEndian>(base_payload.len() as u32)?;
                framed.extend_from_slice(&compressed);
                framed
            }
            _ => base_payload,
        }
    } else {
        base_payload
    };

    if wire_payload.len() > u16::MAX as usize {
        return Err(CodecError::InvalidField(format!(
            "payload of {} bytes exceeds maximum of {}",
            wire_payload.len(),
            u16::MAX
        )));
    }

    let mut buffer = Vec::with_capacity(HEADER_SIZE + wire_payload.len());
    buffer.write_u8(packet.version)?;
    buffer.write_u8(packet.packet_type)?;
    buffer.write_u8(packet.ttl)?;
    buffer.write_u64::<BigEndian>(packet.timestamp_ms)?;
    buffer.write_u8(flags)?;
    buffer.write_u16::<BigEndian>(wire_payload.len() as u16)?;
    buffer.extend_from_slice(&packet.sender_id);
    if let Some(recipient) = &packet.recipient_id {
        buffer.extend_from_slice(recipient);
    }
    buffer.extend_from_slice(&wire_payload);

    Ok(buffer)
}

/// Decode a wire packet. Padding, if any, is left in the payload: only a
/// caller that expects a padded type strips it (§4.A).
pub fn decode(data: &[u8]) -> CodecResult<Packet> {
    if data.len() < HEADER_SIZE {
        return Err(CodecError::Malformed(format!(
            "packet of {} bytes is shorter than the {HEADER_SIZE}-byte header",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let version = cursor.read_u8()?;
    let packet_type = cursor.read_u8()?;
    let ttl = cursor.read_u8()?;
    let timestamp_ms = cursor.read_u64::<BigEndian>()?;
    let flags = cursor.read_u8()?;
    let payload_length = cursor.read_u16::<BigEndian>()? as usize;

    let mut sender_id: NodeId = [0u8; NODE_ID_SIZE];
    cursor.read_exact(&mut sender_id)?;

    let recipient_id = if flags & FLAG_RECIPIENT_PRESENT != 0 {
        let mut recipient: NodeId = [0u8; RECIPIENT_ID_SIZE];
        cursor.read_exact(&mut recipient)?;
        Some(recipient)
    } else {
        None
    };

    let consumed = cursor.position() as usize;
    let remaining = data.len() - consumed;
    if remaining != payload_length {
        return Err(CodecError::Malformed(format!(
            "payload length mismatch: header says {payload_length}, got {remaining}"
        )));
    }

    let mut wire_payload = vec![0u8; payload_length];
    cursor.read_exact(&mut wire_payload)?;

    let payload = if flags & FLAG_COMPRESSED != 0 {
        if wire_payload.len() < 4 {
            return Err(CodecError::Malformed(
                "compressed payload missing 4-byte length prefix".to_string(),
            ));
        }
        let expected = u32::from_be_bytes(wire_payload[..4].try_into().unwrap());
        let decompressed = decompress(&wire_payload[4..])?;
        if decompressed.len() as u32 != expected {
            return Err(CodecError::DecompressionMismatch {
                expected,
                actual: decompressed.len() as u32,
            });
        }
        decompressed
    } else {
        wire_payload
    };

    Ok(Packet {
        version,
        packet_type,
        ttl,
        timestamp_ms,
        sender_id,
        recipient_id,
        payload,
    })
}

fn compress(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}

fn decompress(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Malformed(format!("zlib decompression failed: {e}")))?;
    Ok(out)
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::Malformed(format!("io error while framing packet: {err}"))
    }
}
