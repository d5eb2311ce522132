//! Announce payload TLVs (§4.C).
//!
//! The announce packet payload is a flat sequence of `type(1) length(1)
//! value(length)` records. Unknown type tags are skipped, not rejected,
//! so a future field can be added without breaking older peers.

use super::constants::{ANNOUNCE_TLV_NICKNAME, ANNOUNCE_TLV_PEER_ID};
use super::error::{CodecError, CodecResult};

/// Decoded contents of an Announce packet's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncePayload {
    pub nickname: String,
    pub peer_id: String,
}

/// Encode `payload` as TLVs. Both fields are written, nickname first.
pub fn encode(payload: &AnnouncePayload) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    write_tlv(&mut out, ANNOUNCE_TLV_NICKNAME, payload.nickname.as_bytes())?;
    write_tlv(&mut out, ANNOUNCE_TLV_PEER_ID, payload.peer_id.as_bytes())?;
    Ok(out)
}

fn write_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) -> CodecResult<()> {
    if value.len() > u8::MAX as usize {
        return Err(CodecError::InvalidField(format!(
            "TLV value of {} bytes exceeds the 255-byte length field",
            value.len()
        )));
    }
    out.push(tag);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
    Ok(())
}

/// Decode TLVs out of an Announce payload. Both `nickname` and `peer_id`
/// must be present and valid UTF-8; anything else is `Malformed`.
pub fn decode(data: &[u8]) -> CodecResult<AnnouncePayload> {
    let mut nickname = None;
    let mut peer_id = None;
    let mut cursor = 0usize;

    while cursor < data.len() {
        if cursor + 2 > data.len() {
            return Err(CodecError::Malformed(
                "truncated TLV header in announce payload".to_string(),
            ));
        }
        let tag = data[cursor];
        let length = data[cursor + 1] as usize;
        let value_start = cursor + 2;
        let value_end = value_start + length;
        if value_end > data.len() {
            return Err(CodecError::Malformed(
                "TLV value runs past the end of the announce payload".to_string(),
            ));
        }
        let value = &data[value_start..value_end];

        match tag {
            ANNOUNCE_TLV_NICKNAME => nickname = Some(decode_utf8(value)?),
            ANNOUNCE_TLV_PEER_ID => peer_id = Some(decode_utf8(value)?),
            _ => {} // unknown tag: skip, don't reject
        }

        cursor = value_end;
    }

    Ok(AnnouncePayload {
        nickname: nickname
            .ok_or_else(|| CodecError::Malformed("announce payload missing nickname TLV".to_string()))?,
        peer_id: peer_id
            .ok_or_else(|| CodecError::Malformed("announce payload missing peer_id TLV".to_string()))?,
    })
}

fn decode_utf8(value: &[u8]) -> CodecResult<String> {
    std::str::from_utf8(value)
        .map(str::to_owned)
        .map_err(|e| CodecError::Malformed(format!("TLV value is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> AnnouncePayload {
        AnnouncePayload {
            nickname: "alice".to_string(),
            peer_id: "a1b2c3d4e5f60708".to_string(),
        }
    }

    #[test]
    fn round_trip() {
        let original = payload();
        let encoded = encode(&original).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn unknown_tlv_tag_is_skipped_not_rejected() {
        let mut encoded = encode(&payload()).unwrap();
        encoded.push(0x7F); // unknown tag
        encoded.push(2);
        encoded.extend_from_slice(b"hi");
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, payload());
    }

    #[test]
    fn missing_nickname_is_malformed() {
        let mut out = Vec::new();
        write_tlv(&mut out, ANNOUNCE_TLV_PEER_ID, b"deadbeefcafebabe").unwrap();
        let err = decode(&out).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn truncated_tlv_value_is_malformed() {
        let encoded = vec![ANNOUNCE_TLV_NICKNAME, 10, b'a', b'b']; // claims 10 bytes, has 2
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn empty_nickname_round_trips() {
        let original = AnnouncePayload {
            nickname: String::new(),
            peer_id: "a1b2c3d4e5f60708".to_string(),
        };
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn oversized_value_is_rejected_at_encode_time() {
        let original = AnnouncePayload {
            nickname: "a".repeat(300),
            peer_id: "a1b2c3d4e5f60708".to_string(),
        };
        let err = encode(&original).unwrap_err();
        assert!(matches!(err, CodecError::InvalidField(_)));
    }
}
