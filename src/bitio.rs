//! Bit-level primitives: zig-zag varints, bit-packed arrays, CRC32, SHA-256.
//!
//! Every routine here is total: malformed input never panics, it returns
//! [`BitIoError::Incomplete`]. Callers at the engine boundary convert that
//! into `EngineError::IncompleteData` (see `error.rs`).

use crc32fast::Hasher as Crc32Hasher;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Varints longer than this many bytes are rejected outright rather than
/// looped over forever — bounds `decode_varint` per §8 testable property 7.
pub const MAX_VARINT_BYTES: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitIoError {
    #[error("truncated varint: ran out of bytes before the terminating byte")]
    IncompleteVarint,
    #[error("varint exceeds {MAX_VARINT_BYTES} bytes without terminating — treated as corrupt")]
    VarintTooLong,
    #[error("truncated bitpacked array: expected {expected} bytes, found {found}")]
    IncompleteBitpack { expected: usize, found: usize },
    #[error("bitpack header byte missing")]
    MissingBitpackHeader,
}

// ── Zig-zag ──────────────────────────────────────────────────────────────────

#[inline]
pub fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

// ── Varint (unsigned LEB128) ─────────────────────────────────────────────────

/// Append the unsigned LEB128 encoding of `v` to `out`.
pub fn put_uvarint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

/// Read one unsigned LEB128 varint from `buf[pos..]`, advancing `pos`.
pub fn get_uvarint(buf: &[u8], pos: &mut usize) -> Result<u64, BitIoError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    let mut n = 0usize;
    loop {
        if n >= MAX_VARINT_BYTES {
            return Err(BitIoError::VarintTooLong);
        }
        let idx = *pos + n;
        if idx >= buf.len() {
            return Err(BitIoError::IncompleteVarint);
        }
        let byte = buf[idx];
        n += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            *pos += n;
            return Ok(result);
        }
        shift += 7;
    }
}

/// Zig-zag varint encode a sequence of signed integers.
pub fn encode_varint_seq(xs: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(xs.len() * 2);
    for &x in xs {
        put_uvarint(&mut out, zigzag_encode(x));
    }
    out
}

/// Decode exactly `count` zig-zag varints from `buf`.
pub fn decode_varint_seq(buf: &[u8], count: usize) -> Result<Vec<i64>, BitIoError> {
    let mut out = Vec::with_capacity(count);
    let mut pos = 0usize;
    for _ in 0..count {
        out.push(zigzag_decode(get_uvarint(buf, &mut pos)?));
    }
    Ok(out)
}

// ── Bit-packed arrays ────────────────────────────────────────────────────────

/// Minimum number of bits needed to hold `v` (0 for `v == 0`).
#[inline]
fn bits_needed(v: u64) -> u32 {
    64 - v.leading_zeros()
}

/// Bit-pack a sequence of signed integers after zig-zag encoding.
///
/// Layout: one header byte (bit-width, 0..=64, 0 meaning "all zero"), then
/// the zig-zagged values packed little-endian-within-byte, width bits each.
pub fn encode_bitpack(xs: &[i64]) -> Vec<u8> {
    let zz: Vec<u64> = xs.iter().map(|&x| zigzag_encode(x)).collect();
    let width = zz.iter().fold(0u32, |acc, &v| acc.max(bits_needed(v)));
    let width = width.min(64);

    let mut out = Vec::with_capacity(1 + (xs.len() * width as usize + 7) / 8);
    out.push(width as u8);

    if width == 0 {
        return out;
    }

    // u128 accumulator: at most 63 leftover bits plus a 64-bit width value
    // can be buffered at once, which never overflows a 128-bit register.
    let mut acc: u128 = 0;
    let mut acc_bits: u32 = 0;
    for v in zz {
        acc |= (v as u128) << acc_bits;
        acc_bits += width;
        while acc_bits >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            acc_bits -= 8;
        }
    }
    if acc_bits > 0 {
        out.push((acc & 0xff) as u8);
    }
    out
}

/// Decode a bit-packed array produced by [`encode_bitpack`].
pub fn decode_bitpack(buf: &[u8], count: usize) -> Result<Vec<i64>, BitIoError> {
    if buf.is_empty() {
        return Err(BitIoError::MissingBitpackHeader);
    }
    let width = buf[0] as u32;
    if width == 0 {
        return Ok(vec![0i64; count]);
    }

    let payload = &buf[1..];
    let expected_bytes = (count * width as usize + 7) / 8;
    if payload.len() < expected_bytes {
        return Err(BitIoError::IncompleteBitpack {
            expected: expected_bytes,
            found: payload.len(),
        });
    }

    let mut out = Vec::with_capacity(count);
    let mut bit_pos: usize = 0;
    let mask: u128 = if width >= 64 { u64::MAX as u128 } else { (1u128 << width) - 1 };
    for _ in 0..count {
        let byte_start = bit_pos / 8;
        let bit_off = bit_pos % 8;
        // Read up to 16 bytes (128 bits) to safely cover width up to 64 bits
        // plus a partial leading byte offset.
        let mut acc: u128 = 0;
        let mut shift = 0u32;
        let mut idx = byte_start;
        let needed_bits = bit_off + width as usize;
        while (shift as usize) < needed_bits && idx < payload.len() {
            acc |= (payload[idx] as u128) << shift;
            shift += 8;
            idx += 1;
        }
        let v = ((acc >> bit_off) & mask) as u64;
        out.push(zigzag_decode(v));
        bit_pos += width as usize;
    }
    Ok(out)
}

// ── CRC32 ────────────────────────────────────────────────────────────────────

/// Standard reflected CRC-32 (polynomial 0xEDB88320), as used throughout the
/// on-disk framing (superblock-equivalent header, section manifests, EOS).
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32Hasher::new();
    h.update(bytes);
    h.finalize()
}

// ── SHA-256 ──────────────────────────────────────────────────────────────────

pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Incremental SHA-256 — used for the running file hash, which is updated
/// segment-by-segment as the encoder emits them rather than over the whole
/// file at once.
#[derive(Clone)]
pub struct RunningSha256 {
    inner: Sha256,
}

impl RunningSha256 {
    pub fn new() -> Self {
        Self { inner: Sha256::new() }
    }
    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }
    pub fn finalize(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

impl Default for RunningSha256 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_roundtrip() {
        for v in [-1i64, 0, 1, -1000, 1000, i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn varint_roundtrip() {
        let xs = [-1i64, 0, 1, 127, 128, -128, 1_000_000, -1_000_000, i64::MAX, i64::MIN];
        let encoded = encode_varint_seq(&xs);
        let decoded = decode_varint_seq(&encoded, xs.len()).unwrap();
        assert_eq!(decoded, xs);
    }

    #[test]
    fn varint_truncated_is_incomplete() {
        // 0x80 alone never terminates.
        let buf = [0x80u8];
        let mut pos = 0;
        assert_eq!(get_uvarint(&buf, &mut pos), Err(BitIoError::IncompleteVarint));
    }

    #[test]
    fn varint_too_long_is_rejected() {
        let buf = [0x80u8; MAX_VARINT_BYTES + 1];
        let mut pos = 0;
        assert_eq!(get_uvarint(&buf, &mut pos), Err(BitIoError::VarintTooLong));
    }

    #[test]
    fn bitpack_roundtrip_small_deltas() {
        let xs = [0i64, 1, -1, 2, -2, 63, -64];
        let encoded = encode_bitpack(&xs);
        let decoded = decode_bitpack(&encoded, xs.len()).unwrap();
        assert_eq!(decoded, xs);
    }

    #[test]
    fn bitpack_roundtrip_wide_values() {
        let xs = [i64::MIN, i64::MAX, 0, -1, 123456789012345i64];
        let encoded = encode_bitpack(&xs);
        let decoded = decode_bitpack(&encoded, xs.len()).unwrap();
        assert_eq!(decoded, xs);
    }

    #[test]
    fn bitpack_all_zero_uses_zero_width() {
        let xs = [0i64; 50];
        let encoded = encode_bitpack(&xs);
        assert_eq!(encoded.len(), 1); // just the header byte
        assert_eq!(encoded[0], 0);
        let decoded = decode_bitpack(&encoded, xs.len()).unwrap();
        assert_eq!(decoded, xs);
    }

    #[test]
    fn crc32_matches_known_vector() {
        // CRC-32/ISO-HDLC of "123456789" is 0xCBF43926.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256(b"hello"), sha256(b"hello"));
        assert_ne!(sha256(b"hello"), sha256(b"world"));
    }
}
