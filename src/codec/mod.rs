//! Inner codecs — stateless byte-level transforms over integer streams.
//!
//! Every codec maps a `&[i64]` sequence to a byte payload and back. The
//! codec id is a closed, frozen tagged variant (§9: "Polymorphism across
//! inner codecs... a closed tagged variant... with a `(encode, decode)`
//! pair per variant"); there is no plugin ABI and no runtime registration —
//! unlike the container format this crate is descended from, new codecs are
//! never negotiated, only shipped in a new format version.

use crate::bitio::{
    decode_bitpack, decode_varint_seq, encode_bitpack, encode_varint_seq, get_uvarint,
    put_uvarint, zigzag_decode, zigzag_encode, BitIoError,
};
use crate::context::BlockContext;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("inner codec decode truncated: {0}")]
    Incomplete(#[from] BitIoError),
    #[error("inner codec payload length mismatch: decoded {decoded} values, expected {expected}")]
    CountMismatch { decoded: usize, expected: usize },
    #[error("unknown inner codec id {0}")]
    UnknownCodecId(u8),
    #[error("codec requires a value that cannot be losslessly represented as i64")]
    NotIntegerizable,
}

/// Frozen inner codec identity — see §6 "Inner codec ids".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InnerCodecId {
    None = 0,
    VarintDelta = 1,
    BitpackDelta = 2,
    RleZigzag = 3,
    RleDod = 4,
    DodVarint = 5,
    DictVarint = 6,
    Fixed64Le = 7,
}

impl InnerCodecId {
    pub fn from_u8(v: u8) -> Result<Self, CodecError> {
        match v {
            0 => Ok(InnerCodecId::None),
            1 => Ok(InnerCodecId::VarintDelta),
            2 => Ok(InnerCodecId::BitpackDelta),
            3 => Ok(InnerCodecId::RleZigzag),
            4 => Ok(InnerCodecId::RleDod),
            5 => Ok(InnerCodecId::DodVarint),
            6 => Ok(InnerCodecId::DictVarint),
            7 => Ok(InnerCodecId::Fixed64Le),
            other => Err(CodecError::UnknownCodecId(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Encode `raw` with `codec`, threading `ctx` for codecs that need previous
/// state (VARINT_DELTA, BITPACK_DELTA, RLE_DOD, DOD_VARINT, DICT_VARINT).
///
/// `ctx` is mutated in place — callers that need rollback-on-quarantine
/// semantics must snapshot beforehand (see `context::BlockContext::snapshot`).
pub fn encode_block(
    codec: InnerCodecId,
    raw: &[i64],
    ctx: &mut BlockContext,
) -> Result<Vec<u8>, CodecError> {
    match codec {
        InnerCodecId::None => Ok(Vec::new()),
        InnerCodecId::VarintDelta => Ok(encode_varint_delta(raw, ctx)),
        InnerCodecId::BitpackDelta => Ok(encode_bitpack_delta(raw, ctx)),
        InnerCodecId::RleZigzag => Ok(encode_rle_zigzag(raw)),
        InnerCodecId::RleDod => Ok(encode_rle_dod(raw, ctx)),
        InnerCodecId::DodVarint => Ok(encode_dod_varint(raw, ctx)),
        InnerCodecId::DictVarint => Ok(encode_dict_varint(raw, ctx)),
        InnerCodecId::Fixed64Le => Ok(encode_fixed64_le(raw)),
    }
}

/// Decode `payload` with `codec`, producing exactly `count` values and
/// advancing `ctx` the same way `encode_block` would have.
pub fn decode_block(
    codec: InnerCodecId,
    payload: &[u8],
    count: usize,
    ctx: &mut BlockContext,
) -> Result<Vec<i64>, CodecError> {
    match codec {
        InnerCodecId::None => {
            if count == 0 {
                Ok(Vec::new())
            } else {
                Err(CodecError::CountMismatch { decoded: 0, expected: count })
            }
        }
        InnerCodecId::VarintDelta => decode_varint_delta(payload, count, ctx),
        InnerCodecId::BitpackDelta => decode_bitpack_delta(payload, count, ctx),
        InnerCodecId::RleZigzag => decode_rle_zigzag(payload, count),
        InnerCodecId::RleDod => decode_rle_dod(payload, count, ctx),
        InnerCodecId::DodVarint => decode_dod_varint(payload, count, ctx),
        InnerCodecId::DictVarint => decode_dict_varint(payload, count, ctx),
        InnerCodecId::Fixed64Le => decode_fixed64_le(payload, count),
    }
}

// ── VARINT_DELTA ─────────────────────────────────────────────────────────────
// Value path default: zig-zag varint over per-element deltas from `prev value`.

fn encode_varint_delta(raw: &[i64], ctx: &mut BlockContext) -> Vec<u8> {
    let mut prev = ctx.last_value.unwrap_or(0);
    let mut deltas = Vec::with_capacity(raw.len());
    for &v in raw {
        deltas.push(v.wrapping_sub(prev));
        prev = v;
    }
    ctx.last_value = raw.last().copied().or(ctx.last_value);
    encode_varint_seq(&deltas)
}

fn decode_varint_delta(
    payload: &[u8],
    count: usize,
    ctx: &mut BlockContext,
) -> Result<Vec<i64>, CodecError> {
    let deltas = decode_varint_seq(payload, count)?;
    let mut prev = ctx.last_value.unwrap_or(0);
    let mut out = Vec::with_capacity(count);
    for d in deltas {
        let v = prev.wrapping_add(d);
        out.push(v);
        prev = v;
    }
    ctx.last_value = out.last().copied().or(ctx.last_value);
    Ok(out)
}

// ── BITPACK_DELTA ────────────────────────────────────────────────────────────
// Low-range deltas, bitpacked zig-zag.

fn encode_bitpack_delta(raw: &[i64], ctx: &mut BlockContext) -> Vec<u8> {
    let mut prev = ctx.last_value.unwrap_or(0);
    let mut deltas = Vec::with_capacity(raw.len());
    for &v in raw {
        deltas.push(v.wrapping_sub(prev));
        prev = v;
    }
    ctx.last_value = raw.last().copied().or(ctx.last_value);
    encode_bitpack(&deltas)
}

fn decode_bitpack_delta(
    payload: &[u8],
    count: usize,
    ctx: &mut BlockContext,
) -> Result<Vec<i64>, CodecError> {
    let deltas = decode_bitpack(payload, count)?;
    let mut prev = ctx.last_value.unwrap_or(0);
    let mut out = Vec::with_capacity(count);
    for d in deltas {
        let v = prev.wrapping_add(d);
        out.push(v);
        prev = v;
    }
    ctx.last_value = out.last().copied().or(ctx.last_value);
    Ok(out)
}

// ── RLE_ZIGZAG ───────────────────────────────────────────────────────────────
// Long runs in raw-ish data: (count, value) pairs, varint-packed, no context.

fn encode_rle_zigzag(raw: &[i64]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        let v = raw[i];
        let mut run = 1u64;
        while i + (run as usize) < raw.len() && raw[i + run as usize] == v {
            run += 1;
        }
        put_uvarint(&mut out, run);
        put_uvarint(&mut out, zigzag_encode(v));
        i += run as usize;
    }
    out
}

fn decode_rle_zigzag(payload: &[u8], count: usize) -> Result<Vec<i64>, CodecError> {
    let mut out = Vec::with_capacity(count);
    let mut pos = 0usize;
    while out.len() < count {
        let run = get_uvarint(payload, &mut pos)?;
        let v = zigzag_decode(get_uvarint(payload, &mut pos)?);
        for _ in 0..run {
            out.push(v);
        }
    }
    if out.len() != count {
        return Err(CodecError::CountMismatch { decoded: out.len(), expected: count });
    }
    Ok(out)
}

// ── RLE_DOD ──────────────────────────────────────────────────────────────────
// RLE over the delta-of-delta stream; needs prev value + prev delta.

fn dod_stream(raw: &[i64], last_value: i64, last_delta: i64) -> (Vec<i64>, i64, i64) {
    let mut prev_v = last_value;
    let mut prev_d = last_delta;
    let mut dod = Vec::with_capacity(raw.len());
    for &v in raw {
        let d = v.wrapping_sub(prev_v);
        dod.push(d.wrapping_sub(prev_d));
        prev_d = d;
        prev_v = v;
    }
    (dod, prev_v, prev_d)
}

fn undod_stream(dod: &[i64], last_value: i64, last_delta: i64) -> (Vec<i64>, i64, i64) {
    let mut prev_v = last_value;
    let mut prev_d = last_delta;
    let mut out = Vec::with_capacity(dod.len());
    for &dd in dod {
        let d = prev_d.wrapping_add(dd);
        let v = prev_v.wrapping_add(d);
        out.push(v);
        prev_d = d;
        prev_v = v;
    }
    (out, prev_v, prev_d)
}

fn encode_rle_dod(raw: &[i64], ctx: &mut BlockContext) -> Vec<u8> {
    let (dod, next_v, next_d) =
        dod_stream(raw, ctx.last_value.unwrap_or(0), ctx.last_delta.unwrap_or(0));
    ctx.last_value = Some(next_v);
    ctx.last_delta = Some(next_d);
    encode_rle_zigzag(&dod)
}

fn decode_rle_dod(
    payload: &[u8],
    count: usize,
    ctx: &mut BlockContext,
) -> Result<Vec<i64>, CodecError> {
    let dod = decode_rle_zigzag(payload, count)?;
    let (out, next_v, next_d) =
        undod_stream(&dod, ctx.last_value.unwrap_or(0), ctx.last_delta.unwrap_or(0));
    ctx.last_value = Some(next_v);
    ctx.last_delta = Some(next_d);
    Ok(out)
}

// ── DOD_VARINT ───────────────────────────────────────────────────────────────
// Time path default: varint over the delta-of-delta stream.

fn encode_dod_varint(raw: &[i64], ctx: &mut BlockContext) -> Vec<u8> {
    let (dod, next_v, next_d) =
        dod_stream(raw, ctx.last_value.unwrap_or(0), ctx.last_delta.unwrap_or(0));
    ctx.last_value = Some(next_v);
    ctx.last_delta = Some(next_d);
    encode_varint_seq(&dod)
}

fn decode_dod_varint(
    payload: &[u8],
    count: usize,
    ctx: &mut BlockContext,
) -> Result<Vec<i64>, CodecError> {
    let dod = decode_varint_seq(payload, count)?;
    let (out, next_v, next_d) =
        undod_stream(&dod, ctx.last_value.unwrap_or(0), ctx.last_delta.unwrap_or(0));
    ctx.last_value = Some(next_v);
    ctx.last_delta = Some(next_d);
    Ok(out)
}

// ── DICT_VARINT ──────────────────────────────────────────────────────────────
// Categorical / repetitive values. Varint tag: LSB=1 -> dict index (shifted
// right by 1); LSB=0 -> literal zig-zag value, which is also inserted into
// the dictionary.

fn encode_dict_varint(raw: &[i64], ctx: &mut BlockContext) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in raw {
        if let Some(idx) = ctx.dict.lookup(v) {
            put_uvarint(&mut out, ((idx as u64) << 1) | 1);
        } else {
            put_uvarint(&mut out, zigzag_encode(v) << 1);
            ctx.dict.insert(v);
        }
    }
    out
}

fn decode_dict_varint(
    payload: &[u8],
    count: usize,
    ctx: &mut BlockContext,
) -> Result<Vec<i64>, CodecError> {
    let mut out = Vec::with_capacity(count);
    let mut pos = 0usize;
    for _ in 0..count {
        let tag = get_uvarint(payload, &mut pos)?;
        if tag & 1 == 1 {
            let idx = (tag >> 1) as usize;
            let v = ctx.dict.value_at(idx).unwrap_or(0);
            out.push(v);
        } else {
            let v = zigzag_decode(tag >> 1);
            ctx.dict.insert(v);
            out.push(v);
        }
    }
    Ok(out)
}

// ── FIXED64_LE ───────────────────────────────────────────────────────────────
// Non-coerceable doubles: 8 raw bytes per element, little-endian bit pattern.

fn encode_fixed64_le(raw: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() * 8);
    for &v in raw {
        out.extend_from_slice(&(v as u64).to_le_bytes());
    }
    out
}

fn decode_fixed64_le(payload: &[u8], count: usize) -> Result<Vec<i64>, CodecError> {
    let expected = count * 8;
    if payload.len() < expected {
        return Err(CodecError::Incomplete(BitIoError::IncompleteBitpack {
            expected,
            found: payload.len(),
        }));
    }
    let mut out = Vec::with_capacity(count);
    for chunk in payload[..expected].chunks_exact(8) {
        let bits = u64::from_le_bytes(chunk.try_into().unwrap());
        out.push(bits as i64);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BlockContext;

    fn roundtrip(codec: InnerCodecId, raw: &[i64]) {
        let mut enc_ctx = BlockContext::new();
        let payload = encode_block(codec, raw, &mut enc_ctx).unwrap();
        let mut dec_ctx = BlockContext::new();
        let decoded = decode_block(codec, &payload, raw.len(), &mut dec_ctx).unwrap();
        assert_eq!(decoded, raw, "codec {:?} failed roundtrip", codec);
        assert_eq!(enc_ctx.last_value, dec_ctx.last_value);
        assert_eq!(enc_ctx.last_delta, dec_ctx.last_delta);
    }

    #[test]
    fn none_codec_roundtrips_empty() {
        roundtrip(InnerCodecId::None, &[]);
    }

    #[test]
    fn varint_delta_roundtrips() {
        roundtrip(InnerCodecId::VarintDelta, &[100, 105, 90, 90, 200, -50]);
    }

    #[test]
    fn bitpack_delta_roundtrips() {
        roundtrip(InnerCodecId::BitpackDelta, &[0, 1, 2, 3, 2, 1, 0, -1, -2]);
    }

    #[test]
    fn rle_zigzag_roundtrips() {
        roundtrip(InnerCodecId::RleZigzag, &[5, 5, 5, 5, 9, 9, -3, -3, -3]);
    }

    #[test]
    fn rle_dod_roundtrips() {
        roundtrip(InnerCodecId::RleDod, &[1000, 2000, 3000, 4000, 5000]);
    }

    #[test]
    fn dod_varint_roundtrips() {
        roundtrip(InnerCodecId::DodVarint, &[1000, 2000, 3005, 4001, 5500, 5501]);
    }

    #[test]
    fn dict_varint_roundtrips() {
        roundtrip(InnerCodecId::DictVarint, &[1, 2, 1, 2, 1, 3, 2, 1]);
    }

    #[test]
    fn fixed64_le_roundtrips() {
        let bits: i64 = f64::to_bits(-0.0) as i64;
        roundtrip(InnerCodecId::Fixed64Le, &[bits, f64::to_bits(1.5) as i64]);
    }

    #[test]
    fn codec_id_rejects_unknown() {
        assert!(matches!(InnerCodecId::from_u8(200), Err(CodecError::UnknownCodecId(200))));
    }

    #[test]
    fn context_carries_across_blocks() {
        let mut ctx = BlockContext::new();
        let p1 = encode_block(InnerCodecId::VarintDelta, &[10, 20, 30], &mut ctx).unwrap();
        let p2 = encode_block(InnerCodecId::VarintDelta, &[40, 25], &mut ctx).unwrap();

        let mut dctx = BlockContext::new();
        let d1 = decode_block(InnerCodecId::VarintDelta, &p1, 3, &mut dctx).unwrap();
        let d2 = decode_block(InnerCodecId::VarintDelta, &p2, 2, &mut dctx).unwrap();
        assert_eq!(d1, vec![10, 20, 30]);
        assert_eq!(d2, vec![40, 25]);
    }
}
