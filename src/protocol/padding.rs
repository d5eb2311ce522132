//! Block-size padding to obscure payload length on the wire (§4.B).
//!
//! `pad`/`unpad` are pure functions; the codec decides whether to call
//! `pad` at all (§9: padding is wired up but never turned on by the
//! current protocol — see [`crate::protocol::codec`]).

use super::constants::PADDING_BLOCK_SIZES;

/// PKCS#7-style block padding: pick the smallest configured block size
/// `>= data.len()` and pad up to it; the appended byte value equals the
/// number of padding bytes. Data already `>= 2048` bytes is left alone —
/// it already satisfies the "or >= 2048" half of the length invariant.
///
/// The padding length must fit in a single byte. When the next named
/// block is more than 255 bytes away (true for the 512/1024/2048 jumps,
/// which double each time), a single pad-length byte can't express the
/// gap, so the data is left unpadded rather than padded to some
/// non-block length outside the invariant — the same call bitchat
/// itself makes.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let Some(target) = PADDING_BLOCK_SIZES.iter().copied().find(|&block| block >= len) else {
        return data.to_vec();
    };

    let pad_len = target - len;
    if pad_len == 0 || pad_len > u8::MAX as usize {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    out
}

/// Reverse of [`pad`]. Trims the trailing padding run if, and only if,
/// the trailing byte is a plausible padding length (`1..=data.len()`)
/// and every one of the last `n` bytes equals that length. Otherwise the
/// input is returned unchanged — this is a best-effort heuristic, not a
/// guaranteed inverse, for data whose length already happened to land on
/// a block boundary before padding (see module docs).
pub fn unpad(data: &[u8]) -> Vec<u8> {
    let Some(&last) = data.last() else {
        return data.to_vec();
    };
    let pad_len = last as usize;
    if pad_len == 0 || pad_len > data.len() {
        return data.to_vec();
    }
    let candidate = &data[data.len() - pad_len..];
    if candidate.iter().all(|&b| b == last) {
        data[..data.len() - pad_len].to_vec()
    } else {
        data.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_smallest_block() {
        let data = vec![0xAB; 100];
        let padded = pad(&data);
        assert_eq!(padded.len(), 256);
        assert_eq!(*padded.last().unwrap(), (256 - 100) as u8);
    }

    #[test]
    fn leaves_oversize_data_alone() {
        let data = vec![0x11; 2049];
        let padded = pad(&data);
        assert_eq!(padded, data);
    }

    #[test]
    fn leaves_data_unpadded_when_the_next_block_is_unreachable_in_one_byte() {
        // 513 is just past the 512 block; the next named block is 1024,
        // which would need a 511-byte pad length that can't fit in a byte,
        // so the data is left alone rather than padded to a non-block length.
        let data = vec![0x11; 513];
        let padded = pad(&data);
        assert_eq!(padded, data);
    }

    #[test]
    fn unpad_is_inverse_of_pad_for_realistic_lengths() {
        for len in [1usize, 31, 150, 255, 257, 511, 2000] {
            let data = vec![0x42; len];
            let padded = pad(&data);
            assert_eq!(unpad(&padded), data, "len={len}");
        }
    }

    #[test]
    fn pad_leaves_unreachable_lengths_unpadded_and_unpad_still_round_trips() {
        // 1025's nearest named block (2048) is out of one-byte reach, so
        // pad leaves it alone. Non-constant fill avoids a false-positive
        // padding match in unpad's trailing-run heuristic.
        let data: Vec<u8> = (0..1025u32).map(|i| (i % 199) as u8).collect();
        let padded = pad(&data);
        assert_eq!(padded, data);
        assert_eq!(unpad(&padded), data);
    }

    #[test]
    fn unpad_leaves_unpadded_data_alone() {
        let data = vec![1, 2, 3, 4, 5];
        // Last byte 5 would claim 5 bytes of padding, but they don't all equal 5.
        assert_eq!(unpad(&data), data);
    }

    #[test]
    fn padded_length_is_never_smaller_than_input_and_fits_one_pad_byte() {
        for len in 0..=2100usize {
            let padded = pad(&vec![0u8; len]);
            assert!(padded.len() >= len);
            assert!(padded.len() - len <= u8::MAX as usize);
        }
    }
}
