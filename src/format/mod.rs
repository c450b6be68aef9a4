//! On-disk binary framing: file envelope, encryption header, EOS trailer
//! (§4.9, §6 "External interfaces"). Segment- and stream-section-level
//! framing lives in [`segment`].
//!
//! All multi-byte integers are little-endian unless stated otherwise. Every
//! `read_*` function is total over truncated input: it returns
//! [`FormatParseError::Incomplete`] rather than panicking or reading out of
//! bounds, the same discipline `bitio` uses for varints.

pub mod segment;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"GICS";
pub const FORMAT_VERSION: u8 = 3;

pub const FLAG_HAS_SCHEMA: u32 = 0x04;
pub const FLAG_ENCRYPTED: u32 = 0x80;
/// Reserved bit (§6 "others reserved") claimed by this implementation to
/// flag a string-item-id intern table placed right after the schema blob.
/// A file only carries one when the embedded schema declares string item
/// ids and at least one distinct id was seen.
pub const FLAG_HAS_STRING_TABLE: u32 = 0x08;

pub const STREAM_ID_TIME: u8 = 10;
pub const STREAM_ID_VALUE: u8 = 20;
pub const STREAM_ID_META: u8 = 30;
pub const STREAM_ID_ITEM_ID: u8 = 40;
pub const STREAM_ID_QUANTITY: u8 = 50;
pub const STREAM_ID_SNAPSHOT_LEN: u8 = 60;
pub const STREAM_ID_SCHEMA_EXTRA_BASE: u8 = 100;

pub const OUTER_CODEC_NONE: u8 = 0;
pub const OUTER_CODEC_ZSTD: u8 = 1;

pub const EOS_MARKER: u8 = 0xFF;
pub const EOS_TRAILER_LEN: usize = 1 + 32 + 4;
pub const ENC_HEADER_LEN: usize = 1 + 16 + 32 + 1 + 4 + 1 + 12;

const AAD_TAG: [u8; 5] = [b'G', b'I', b'C', b'S', 0x03];

/// The fixed AAD bound into every section's AEAD tag (§4.10).
pub fn aad_tag() -> &'static [u8; 5] {
    &AAD_TAG
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatParseError {
    #[error("truncated input: needed {needed} bytes at offset {offset}, had {available}")]
    Incomplete { offset: usize, needed: usize, available: usize },
    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: Vec<u8>, found: Vec<u8> },
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown stream id {0}")]
    UnknownStreamId(u8),
    #[error("unknown outer codec id {0}")]
    UnknownOuterCodec(u8),
    #[error("hash mismatch: expected {expected:?}, found {found:?}")]
    HashMismatch { expected: Vec<u8>, found: Vec<u8> },
    #[error("CRC32 mismatch: expected {expected:08x}, found {found:08x}")]
    Crc32Mismatch { expected: u32, found: u32 },
    #[error("schema blob error: {0}")]
    SchemaError(String),
    #[error("missing EOS trailer: expected marker 0x{expected:02x}, found 0x{found:02x}")]
    MissingEos { expected: u8, found: u8 },
}

/// Bounds-checked slice read, converting out-of-range into
/// `FormatParseError::Incomplete` (§4.8 "a single out-of-range read ... is
/// caught and re-raised as IncompleteData").
pub fn take<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], FormatParseError> {
    if *pos + n > buf.len() {
        return Err(FormatParseError::Incomplete { offset: *pos, needed: n, available: buf.len().saturating_sub(*pos) });
    }
    let s = &buf[*pos..*pos + n];
    *pos += n;
    Ok(s)
}

pub fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8, FormatParseError> {
    Ok(take(buf, pos, 1)?[0])
}

pub fn read_u16le(buf: &[u8], pos: &mut usize) -> Result<u16, FormatParseError> {
    Ok(LittleEndian::read_u16(take(buf, pos, 2)?))
}

pub fn read_u32le(buf: &[u8], pos: &mut usize) -> Result<u32, FormatParseError> {
    Ok(LittleEndian::read_u32(take(buf, pos, 4)?))
}

pub fn read_i64le(buf: &[u8], pos: &mut usize) -> Result<i64, FormatParseError> {
    Ok(LittleEndian::read_i64(take(buf, pos, 8)?))
}

/// The leading `MAGIC VERSION FLAGS STREAM_COUNT` fields common to every
/// file (§3 "File envelope": "Fixed magic ..., version byte ..., 32-bit
/// little-endian flags, stream count").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u8,
    pub flags: u32,
    pub stream_count: u16,
}

impl FileHeader {
    pub fn has_schema(&self) -> bool {
        self.flags & FLAG_HAS_SCHEMA != 0
    }
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(MAGIC);
        out.push(self.version);
        let mut flag_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut flag_bytes, self.flags);
        out.extend_from_slice(&flag_bytes);
        let mut sc_bytes = [0u8; 2];
        LittleEndian::write_u16(&mut sc_bytes, self.stream_count);
        out.extend_from_slice(&sc_bytes);
    }

    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self, FormatParseError> {
        let magic = take(buf, pos, 4)?;
        if magic != MAGIC {
            return Err(FormatParseError::BadMagic { expected: MAGIC.to_vec(), found: magic.to_vec() });
        }
        let version = read_u8(buf, pos)?;
        if version != FORMAT_VERSION {
            return Err(FormatParseError::UnsupportedVersion(version));
        }
        let flags = read_u32le(buf, pos)?;
        let stream_count = read_u16le(buf, pos)?;
        Ok(FileHeader { version, flags, stream_count })
    }
}

/// Key-derivation / AEAD parameters persisted in the file (§4.10, §6
/// "EncHeader").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncHeader {
    pub enc_mode: u8,
    pub salt: [u8; 16],
    pub auth_verify: [u8; 32],
    pub kdf_id: u8,
    pub iterations: u32,
    pub digest_id: u8,
    pub file_nonce: [u8; 12],
}

impl EncHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.enc_mode);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.auth_verify);
        out.push(self.kdf_id);
        let mut it_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut it_bytes, self.iterations);
        out.extend_from_slice(&it_bytes);
        out.push(self.digest_id);
        out.extend_from_slice(&self.file_nonce);
    }

    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self, FormatParseError> {
        let enc_mode = read_u8(buf, pos)?;
        let salt: [u8; 16] = take(buf, pos, 16)?.try_into().unwrap();
        let auth_verify: [u8; 32] = take(buf, pos, 32)?.try_into().unwrap();
        let kdf_id = read_u8(buf, pos)?;
        let iterations = read_u32le(buf, pos)?;
        let digest_id = read_u8(buf, pos)?;
        let file_nonce: [u8; 12] = take(buf, pos, 12)?.try_into().unwrap();
        Ok(EncHeader { enc_mode, salt, auth_verify, kdf_id, iterations, digest_id, file_nonce })
    }
}

/// The 37-byte trailer whose presence and validity are the sole proof a
/// file was completely written (§3, GLOSSARY "EOS").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EosTrailer {
    pub file_hash: [u8; 32],
    pub crc32: u32,
}

impl EosTrailer {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(EOS_MARKER);
        out.extend_from_slice(&self.file_hash);
        let mut crc_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut crc_bytes, self.crc32);
        out.extend_from_slice(&crc_bytes);
    }

    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self, FormatParseError> {
        let marker = read_u8(buf, pos)?;
        if marker != EOS_MARKER {
            return Err(FormatParseError::MissingEos { expected: EOS_MARKER, found: marker });
        }
        let file_hash: [u8; 32] = take(buf, pos, 32)?.try_into().unwrap();
        let crc32 = read_u32le(buf, pos)?;
        Ok(EosTrailer { file_hash, crc32 })
    }
}

/// Whole-file string-item-id intern table: position in `strings` is the
/// integer value carried by the ITEM_ID stream for string-keyed schemas.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringTable {
    pub strings: Vec<String>,
}

impl StringTable {
    pub fn write(&self, out: &mut Vec<u8>) {
        let mut b4 = [0u8; 4];
        LittleEndian::write_u32(&mut b4, self.strings.len() as u32);
        out.extend_from_slice(&b4);
        for s in &self.strings {
            let bytes = s.as_bytes();
            let mut b2 = [0u8; 2];
            LittleEndian::write_u16(&mut b2, bytes.len() as u16);
            out.extend_from_slice(&b2);
            out.extend_from_slice(bytes);
        }
    }

    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self, FormatParseError> {
        let count = read_u32le(buf, pos)?;
        let mut strings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_u16le(buf, pos)? as usize;
            let bytes = take(buf, pos, len)?;
            strings.push(String::from_utf8_lossy(bytes).into_owned());
        }
        Ok(StringTable { strings })
    }
}

/// Length-prefixed JSON encoding of the embedded schema blob. JSON (via
/// `serde_json`) rather than a bespoke binary layout — the schema is small,
/// written once per file, and never touches the bit-exactness-critical hot
/// path the block codecs own.
pub fn write_schema_blob(schema: &crate::model::SchemaProfile, out: &mut Vec<u8>) -> Result<(), FormatParseError> {
    let json = serde_json::to_vec(schema).map_err(|e| FormatParseError::SchemaError(e.to_string()))?;
    let mut b4 = [0u8; 4];
    LittleEndian::write_u32(&mut b4, json.len() as u32);
    out.extend_from_slice(&b4);
    out.extend_from_slice(&json);
    Ok(())
}

pub fn read_schema_blob(buf: &[u8], pos: &mut usize) -> Result<crate::model::SchemaProfile, FormatParseError> {
    let len = read_u32le(buf, pos)? as usize;
    let bytes = take(buf, pos, len)?;
    serde_json::from_slice(bytes).map_err(|e| FormatParseError::SchemaError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_blob_roundtrips() {
        let schema = crate::model::SchemaProfile::legacy();
        let mut buf = Vec::new();
        write_schema_blob(&schema, &mut buf).unwrap();
        let mut pos = 0;
        let back = read_schema_blob(&buf, &mut pos).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn string_table_roundtrips() {
        let t = StringTable { strings: vec!["AAPL".to_string(), "GOOG".to_string()] };
        let mut buf = Vec::new();
        t.write(&mut buf);
        let mut pos = 0;
        assert_eq!(StringTable::read(&buf, &mut pos).unwrap(), t);
    }

    #[test]
    fn file_header_roundtrips() {
        let h = FileHeader { version: FORMAT_VERSION, flags: FLAG_HAS_SCHEMA, stream_count: 5 };
        let mut buf = Vec::new();
        h.write(&mut buf);
        let mut pos = 0;
        let back = FileHeader::read(&buf, &mut pos).unwrap();
        assert_eq!(back, h);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = b"NOPE\x03\x00\x00\x00\x00\x00\x00".to_vec();
        let mut pos = 0;
        assert!(matches!(FileHeader::read(&buf, &mut pos), Err(FormatParseError::BadMagic { .. })));
    }

    #[test]
    fn truncated_header_is_incomplete() {
        let buf = b"GICS".to_vec();
        let mut pos = 0;
        assert!(matches!(FileHeader::read(&buf, &mut pos), Err(FormatParseError::Incomplete { .. })));
    }

    #[test]
    fn eos_trailer_roundtrips() {
        let t = EosTrailer { file_hash: [7u8; 32], crc32: 0xdead_beef };
        let mut buf = Vec::new();
        t.write(&mut buf);
        assert_eq!(buf.len(), EOS_TRAILER_LEN);
        let mut pos = 0;
        let back = EosTrailer::read(&buf, &mut pos).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn enc_header_roundtrips() {
        let h = EncHeader {
            enc_mode: 1,
            salt: [1u8; 16],
            auth_verify: [2u8; 32],
            kdf_id: 0,
            iterations: 600_000,
            digest_id: 0,
            file_nonce: [3u8; 12],
        };
        let mut buf = Vec::new();
        h.write(&mut buf);
        assert_eq!(buf.len(), ENC_HEADER_LEN);
        let mut pos = 0;
        let back = EncHeader::read(&buf, &mut pos).unwrap();
        assert_eq!(back, h);
    }
}
