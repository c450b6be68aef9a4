//! Outer codecs — section-level general compressors applied to a stream
//! section's raw payload (§2 component 3, §4.7 "choose an outer codec").
//!
//! Only two variants exist: NONE and Zstd. Selection is a pure function of
//! payload size and a caller-provided entropy estimate, never adaptive
//! retrying — matching the engine's determinism requirement (§4.7
//! "Determinism").

use crate::format::{OUTER_CODEC_NONE, OUTER_CODEC_ZSTD};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OuterCodecError {
    #[error("zstd compression failed: {0}")]
    CompressFailed(std::io::Error),
    #[error("zstd decompression failed: {0}")]
    DecompressFailed(std::io::Error),
    #[error("decompressed payload exceeds size cap of {cap} bytes")]
    SizeCapExceeded { cap: usize },
    #[error("unknown outer codec id {0}")]
    UnknownCodecId(u8),
}

/// Minimum payload size below which Zstd framing overhead isn't worth
/// paying; smaller sections are always stored as NONE.
const MIN_ZSTD_PAYLOAD: usize = 64;

/// High-entropy payloads rarely shrink under a general compressor; skip the
/// call entirely rather than spend the cycles for no gain.
const HIGH_ENTROPY_UNIQUE_RATIO: f64 = 0.95;

pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Choose NONE or Zstd for a payload, given a cheap entropy proxy the
/// caller already computed (e.g. the stream's blockwise `unique_ratio`
/// average) — §4.7: "NONE if payload is small or high-entropy, Zstd
/// otherwise".
pub fn choose_outer_codec(payload_len: usize, unique_ratio_estimate: f64) -> u8 {
    if payload_len < MIN_ZSTD_PAYLOAD || unique_ratio_estimate > HIGH_ENTROPY_UNIQUE_RATIO {
        OUTER_CODEC_NONE
    } else {
        OUTER_CODEC_ZSTD
    }
}

pub fn compress(codec: u8, raw: &[u8]) -> Result<Vec<u8>, OuterCodecError> {
    match codec {
        OUTER_CODEC_NONE => Ok(raw.to_vec()),
        OUTER_CODEC_ZSTD => zstd::stream::encode_all(raw, DEFAULT_ZSTD_LEVEL).map_err(OuterCodecError::CompressFailed),
        other => Err(OuterCodecError::UnknownCodecId(other)),
    }
}

/// Decompress `payload`, refusing to materialize more than `size_cap`
/// bytes (§4.8 "outer-decompress with a hard size cap").
pub fn decompress(codec: u8, payload: &[u8], size_cap: usize) -> Result<Vec<u8>, OuterCodecError> {
    match codec {
        OUTER_CODEC_NONE => {
            if payload.len() > size_cap {
                return Err(OuterCodecError::SizeCapExceeded { cap: size_cap });
            }
            Ok(payload.to_vec())
        }
        OUTER_CODEC_ZSTD => {
            let mut out = Vec::new();
            let mut decoder = zstd::stream::Decoder::new(payload).map_err(OuterCodecError::DecompressFailed)?;
            let mut capped = (&mut decoder).take(size_cap as u64 + 1);
            std::io::copy(&mut capped, &mut out).map_err(OuterCodecError::DecompressFailed)?;
            if out.len() > size_cap {
                return Err(OuterCodecError::SizeCapExceeded { cap: size_cap });
            }
            Ok(out)
        }
        other => Err(OuterCodecError::UnknownCodecId(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_chooses_none() {
        assert_eq!(choose_outer_codec(10, 0.1), OUTER_CODEC_NONE);
    }

    #[test]
    fn high_entropy_chooses_none() {
        assert_eq!(choose_outer_codec(10_000, 0.99), OUTER_CODEC_NONE);
    }

    #[test]
    fn large_low_entropy_chooses_zstd() {
        assert_eq!(choose_outer_codec(10_000, 0.1), OUTER_CODEC_ZSTD);
    }

    #[test]
    fn none_roundtrips() {
        let raw = b"hello world".to_vec();
        let compressed = compress(OUTER_CODEC_NONE, &raw).unwrap();
        let back = decompress(OUTER_CODEC_NONE, &compressed, 1024).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn zstd_roundtrips() {
        let raw = vec![7u8; 4096];
        let compressed = compress(OUTER_CODEC_ZSTD, &raw).unwrap();
        assert!(compressed.len() < raw.len());
        let back = decompress(OUTER_CODEC_ZSTD, &compressed, 1 << 20).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn decompress_respects_size_cap() {
        let raw = vec![3u8; 10_000];
        let compressed = compress(OUTER_CODEC_ZSTD, &raw).unwrap();
        assert!(matches!(
            decompress(OUTER_CODEC_ZSTD, &compressed, 100),
            Err(OuterCodecError::SizeCapExceeded { cap: 100 })
        ));
    }

    #[test]
    fn unknown_codec_id_rejected() {
        assert!(matches!(compress(250, b""), Err(OuterCodecError::UnknownCodecId(250))));
    }
}
