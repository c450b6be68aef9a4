//! Decoder pipeline (§4.8): parses the file envelope, segments, and stream
//! sections, verifies every hash/CRC along the way, and reconstructs
//! snapshots bit-exactly from their per-stream blocks.

use std::collections::BTreeMap;

use crate::bitio::{crc32, sha256};
use crate::codec::{decode_block, InnerCodecId};
use crate::context::BlockContext;
use crate::crypto::{self, derive_key};
use crate::error::EngineError;
use crate::field_math::{bits_block_to_f64, i64_block_to_f64};
use crate::format::segment::{BlockManifestEntry, SegmentFooter, SegmentHeader, SegmentIndex, StreamSectionHeader};
use crate::format::{
    self, EncHeader, EosTrailer, FileHeader, STREAM_ID_ITEM_ID, STREAM_ID_QUANTITY,
    STREAM_ID_SNAPSHOT_LEN, STREAM_ID_TIME, STREAM_ID_VALUE,
};
use crate::model::{FieldRecord, ItemId, ItemIdKind, SchemaProfile, Snapshot};
use crate::outer;

pub const DEFAULT_DECOMPRESSION_SIZE_CAP: usize = 1024 * 1024 * 1024;

/// Whether integrity verification re-checks every hash/CRC (`Strict`, the
/// default) or only parses enough framing to reconstruct data, skipping the
/// section/segment/file hash comparisons (`FramingOnly`) — a cheaper mode
/// for callers that trust the source and only want structural validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityMode {
    #[default]
    Strict,
    FramingOnly,
}

#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    pub password: Option<String>,
    pub integrity_mode: IntegrityMode,
    pub decompression_size_cap: usize,
}

impl UnpackOptions {
    pub fn new() -> Self {
        UnpackOptions { password: None, integrity_mode: IntegrityMode::Strict, decompression_size_cap: DEFAULT_DECOMPRESSION_SIZE_CAP }
    }
}

pub(crate) struct DecodedBlock {
    pub(crate) values: Vec<i64>,
    pub(crate) inner_codec: u8,
}

pub(crate) struct StreamDecodeState {
    pub(crate) ctx: BlockContext,
}

impl StreamDecodeState {
    pub(crate) fn new() -> Self {
        StreamDecodeState { ctx: BlockContext::new() }
    }
}

pub struct Decoder {
    bytes: Vec<u8>,
    options: UnpackOptions,
}

impl Decoder {
    pub fn new(bytes: Vec<u8>, options: UnpackOptions) -> Self {
        let options = if options.decompression_size_cap == 0 {
            UnpackOptions { decompression_size_cap: DEFAULT_DECOMPRESSION_SIZE_CAP, ..options }
        } else {
            options
        };
        Decoder { bytes, options }
    }

    /// Parse just the file header, without touching segment data (§4.8
    /// "parse_header()").
    pub fn parse_header(&self) -> Result<FileHeader, EngineError> {
        let mut pos = 0usize;
        FileHeader::read(&self.bytes, &mut pos).map_err(EngineError::from)
    }

    /// Parse and return the embedded schema, or the legacy default when no
    /// schema blob is present (§4.8 "get_schema()").
    pub fn get_schema(&self) -> Result<SchemaProfile, EngineError> {
        let mut pos = 0usize;
        let header = FileHeader::read(&self.bytes, &mut pos)?;
        if header.has_schema() {
            format::read_schema_blob(&self.bytes, &mut pos).map_err(EngineError::from)
        } else {
            Ok(SchemaProfile::legacy())
        }
    }

    /// Fully decode the file into snapshots, in original order (§4.8
    /// "get_all_snapshots()").
    pub fn get_all_snapshots(&self) -> Result<Vec<Snapshot>, EngineError> {
        let (snapshots, _) = self.run(true)?;
        Ok(snapshots)
    }

    /// Re-verify every hash and CRC without materializing snapshots (§4.8
    /// "verify()"). Returns `true` if every check passes, `false` on any
    /// integrity or framing failure.
    pub fn verify(&self) -> bool {
        self.run(false).is_ok()
    }

    fn derive_file_key(&self, enc: &EncHeader) -> Result<[u8; crypto::KEY_LEN], EngineError> {
        let password = self.options.password.as_deref().ok_or_else(|| {
            EngineError::usage("file is encrypted but no password was supplied")
        })?;
        let key = derive_key(password, &enc.salt, enc.iterations);
        crypto::verify_auth(&key, &enc.auth_verify)?;
        Ok(key)
    }

    /// Shared parse/verify/reconstruct routine. `materialize` controls
    /// whether decoded blocks are reassembled into `Snapshot`s (`verify()`
    /// only needs the hash checks, not the reconstruction).
    fn run(&self, materialize: bool) -> Result<(Vec<Snapshot>, ()), EngineError> {
        let buf = &self.bytes;
        let mut pos = 0usize;

        let header = FileHeader::read(buf, &mut pos)?;
        let schema = if header.has_schema() {
            format::read_schema_blob(buf, &mut pos)?
        } else {
            SchemaProfile::legacy()
        };

        let string_table = if header.flags & format::FLAG_HAS_STRING_TABLE != 0 {
            format::StringTable::read(buf, &mut pos)?.strings
        } else {
            Vec::new()
        };

        let file_key = if header.is_encrypted() {
            let enc = EncHeader::read(buf, &mut pos)?;
            Some((self.derive_file_key(&enc)?, enc.file_nonce))
        } else {
            None
        };

        if buf.len() < pos + format::EOS_TRAILER_LEN {
            return Err(EngineError::incomplete("file too short for EOS trailer"));
        }
        let body_end = buf.len() - format::EOS_TRAILER_LEN;
        let mut trailer_pos = body_end;
        let trailer = EosTrailer::read(buf, &mut trailer_pos).map_err(EngineError::from)?;

        if self.options.integrity_mode == IntegrityMode::Strict {
            let observed_crc = crc32(&buf[..body_end]);
            if observed_crc != trailer.crc32 {
                return Err(EngineError::integrity(format!(
                    "file CRC mismatch: expected {:08x}, found {:08x}",
                    trailer.crc32, observed_crc
                )));
            }
            let observed_hash = sha256(&buf[..body_end]);
            if observed_hash != trailer.file_hash {
                return Err(EngineError::integrity("file hash mismatch"));
            }
        }

        let extra_fields: Vec<(String, u8)> =
            schema.extra_fields().into_iter().map(|(f, id)| (f.name.clone(), id)).collect();
        let mut states: BTreeMap<u8, StreamDecodeState> = BTreeMap::new();
        states.insert(STREAM_ID_TIME, StreamDecodeState::new());
        states.insert(STREAM_ID_SNAPSHOT_LEN, StreamDecodeState::new());
        states.insert(STREAM_ID_ITEM_ID, StreamDecodeState::new());
        states.insert(STREAM_ID_VALUE, StreamDecodeState::new());
        states.insert(STREAM_ID_QUANTITY, StreamDecodeState::new());
        for (_, id) in &extra_fields {
            states.insert(*id, StreamDecodeState::new());
        }

        let mut snapshots = Vec::new();
        let mut segment_id_expected = 0u32;

        while pos < body_end {
            let header_start = pos;
            let seg_header = SegmentHeader::read(buf, &mut pos)?;
            if seg_header.segment_id != segment_id_expected {
                return Err(EngineError::format(format!(
                    "out-of-order segment id: expected {}, found {}",
                    segment_id_expected, seg_header.segment_id
                )));
            }
            segment_id_expected += 1;

            let mut per_stream_blocks: BTreeMap<u8, Vec<DecodedBlock>> = BTreeMap::new();

            for _ in 0..seg_header.stream_count {
                let section_header = StreamSectionHeader::read(buf, &mut pos)?;
                let mut manifest = Vec::with_capacity(section_header.block_count as usize);
                for _ in 0..section_header.block_count {
                    manifest.push(BlockManifestEntry::read(buf, &mut pos)?);
                }
                let stored = format::take(buf, &mut pos, section_header.compressed_len as usize)?;

                if self.options.integrity_mode == IntegrityMode::Strict {
                    let observed = sha256(stored);
                    if observed != section_header.section_hash {
                        return Err(EngineError::integrity(format!(
                            "section hash mismatch for stream {}",
                            section_header.stream_id
                        )));
                    }
                }

                let compressed = if let Some((key, file_nonce)) = file_key {
                    let iv = crypto::derive_section_iv(&key, &file_nonce, section_header.stream_id, seg_header.segment_id);
                    crypto::decrypt_section(&key, &iv, stored, format::aad_tag())?
                } else {
                    stored.to_vec()
                };

                let raw_payload = outer::decompress(
                    section_header.outer_codec,
                    &compressed,
                    self.options.decompression_size_cap,
                )
                .map_err(EngineError::from)?;
                if raw_payload.len() != section_header.uncompressed_len as usize {
                    return Err(EngineError::format(format!(
                        "section {} uncompressed length mismatch",
                        section_header.stream_id
                    )));
                }

                let state = states
                    .entry(section_header.stream_id)
                    .or_insert_with(StreamDecodeState::new);

                let mut blocks = Vec::with_capacity(manifest.len());
                let mut off = 0usize;
                for entry in &manifest {
                    if entry.stream_id != section_header.stream_id {
                        return Err(EngineError::format("manifest entry stream id does not match section"));
                    }
                    let payload = raw_payload.get(off..off + entry.payload_len as usize).ok_or_else(|| {
                        EngineError::incomplete("block payload runs past section boundary")
                    })?;
                    off += entry.payload_len as usize;

                    let codec = InnerCodecId::from_u8(entry.inner_codec)?;
                    let values = decode_block(codec, payload, entry.n_items as usize, &mut state.ctx)?;
                    blocks.push(DecodedBlock { values, inner_codec: entry.inner_codec });
                }
                per_stream_blocks.insert(section_header.stream_id, blocks);
            }

            let index = SegmentIndex::read(buf, &mut pos)?;
            let _ = index;

            let footer_start = pos;
            let footer = SegmentFooter::read(buf, &mut pos)?;
            if self.options.integrity_mode == IntegrityMode::Strict {
                let observed_crc = crc32(&buf[header_start..footer_start]);
                if observed_crc != footer.crc32 {
                    return Err(EngineError::integrity("segment CRC mismatch"));
                }
                let observed_hash = sha256(&buf[header_start..footer_start]);
                if observed_hash != footer.segment_hash {
                    return Err(EngineError::integrity("segment hash mismatch"));
                }
            }
            if materialize {
                let mut seg_snapshots =
                    reconstruct_segment(&per_stream_blocks, &schema, &extra_fields, &string_table)?;
                snapshots.append(&mut seg_snapshots);
            }
        }

        Ok((snapshots, ()))
    }
}

/// Flatten every block of a stream into one `i64` sequence, in block order.
pub(crate) fn flatten_stream(blocks: &[DecodedBlock]) -> Vec<i64> {
    let mut out = Vec::new();
    for b in blocks {
        out.extend_from_slice(&b.values);
    }
    out
}

/// A stream's values as `f64`, disambiguating per block whether the decoded
/// `i64`s are plain integers (every inner codec except FIXED64_LE) or raw
/// bit patterns (FIXED64_LE), per the manifest's recorded codec id.
pub(crate) fn flatten_float_stream(blocks: &[DecodedBlock]) -> Vec<f64> {
    let mut out = Vec::new();
    for b in blocks {
        if b.inner_codec == InnerCodecId::Fixed64Le.as_u8() {
            out.extend_from_slice(&bits_block_to_f64(&b.values));
        } else {
            out.extend_from_slice(&i64_block_to_f64(&b.values));
        }
    }
    out
}

pub(crate) fn reconstruct_segment(
    per_stream: &BTreeMap<u8, Vec<DecodedBlock>>,
    schema: &SchemaProfile,
    extra_fields: &[(String, u8)],
    string_table: &[String],
) -> Result<Vec<Snapshot>, EngineError> {
    let empty = Vec::new();
    let times = flatten_stream(per_stream.get(&STREAM_ID_TIME).unwrap_or(&empty));
    let lens = flatten_stream(per_stream.get(&STREAM_ID_SNAPSHOT_LEN).unwrap_or(&empty));
    let item_ids = flatten_stream(per_stream.get(&STREAM_ID_ITEM_ID).unwrap_or(&empty));
    let values = flatten_float_stream(per_stream.get(&STREAM_ID_VALUE).unwrap_or(&empty));
    let quantities = flatten_float_stream(per_stream.get(&STREAM_ID_QUANTITY).unwrap_or(&empty));

    let mut extras: BTreeMap<u8, Vec<f64>> = BTreeMap::new();
    for (_, id) in extra_fields {
        extras.insert(*id, flatten_float_stream(per_stream.get(id).unwrap_or(&empty)));
    }

    if times.len() != lens.len() {
        return Err(EngineError::format("time and snapshot-length streams disagree in block count"));
    }

    let mut snapshots = Vec::with_capacity(times.len());
    let mut cursor = 0usize;
    for (i, &timestamp) in times.iter().enumerate() {
        let n = lens[i] as usize;
        let mut snap = Snapshot::new(timestamp);
        for j in 0..n {
            let k = cursor + j;
            let id_code = *item_ids.get(k).ok_or_else(|| EngineError::incomplete("item id stream underrun"))?;
            let id = if schema.item_id_kind == ItemIdKind::String {
                let s = string_table
                    .get(id_code as usize)
                    .ok_or_else(|| EngineError::format("string item id out of range of string table"))?;
                ItemId::String(s.clone())
            } else {
                ItemId::Numeric(id_code)
            };
            let price = *values.get(k).ok_or_else(|| EngineError::incomplete("value stream underrun"))?;
            let quantity = *quantities.get(k).ok_or_else(|| EngineError::incomplete("quantity stream underrun"))?;
            snap.items.push((id, FieldRecord { price, quantity }));
            for (name, id) in extra_fields {
                let v = extras.get(id).and_then(|vec| vec.get(k)).copied().unwrap_or(0.0);
                snap.extra_fields.entry(name.clone()).or_insert_with(Vec::new).push(v);
            }
        }
        cursor += n;
        snapshots.push(snap);
    }
    Ok(snapshots)
}

pub fn unpack(bytes: Vec<u8>, options: UnpackOptions) -> Result<Vec<Snapshot>, EngineError> {
    Decoder::new(bytes, options).get_all_snapshots()
}

pub fn verify(bytes: Vec<u8>, options: UnpackOptions) -> bool {
    Decoder::new(bytes, options).verify()
}
