//! Encoder pipeline (§4.7): buffers snapshots, forms fixed-size blocks per
//! field stream, selects an inner codec under Compression Health Monitor
//! supervision, and assembles segment/section framing.
//!
//! Simplification from the distilled pipeline: `add_snapshot` only buffers
//! (the crate's one true suspension point per §5 is "reading the next input
//! snapshot from the caller"); the entire chunk/segment assembly described
//! in §4.7 steps 1-9 runs inside `finish()`. This keeps the single-mutation
//! discipline around `BlockContext` exact (see `process_block` below)
//! without needing a separate streaming-flush state machine. Recorded as an
//! open-question resolution in `DESIGN.md`.

use std::collections::BTreeMap;

use rand::RngCore;

use crate::bitio::RunningSha256;
use crate::chm::{ChmContinuity, ChmReport, ChmStats, CompressionHealthMonitor, Route};
use crate::codec::{encode_block, InnerCodecId};
use crate::context::BlockContext;
use crate::crypto::{self, derive_key};
use crate::error::EngineError;
use crate::field_math::{f64_block_is_integerizable, f64_block_to_bits, f64_block_to_i64};
use crate::format::segment::{
    BlockManifestEntry, SegmentFooter, SegmentHeader, SegmentIndex, StreamSectionHeader,
    BLOCK_MANIFEST_ENTRY_LEN,
};
use crate::format::{
    self, EncHeader, EosTrailer, FileHeader, FLAG_ENCRYPTED, FLAG_HAS_SCHEMA,
    FLAG_HAS_STRING_TABLE, FORMAT_VERSION, STREAM_ID_ITEM_ID, STREAM_ID_QUANTITY,
    STREAM_ID_SNAPSHOT_LEN, STREAM_ID_TIME, STREAM_ID_VALUE,
};
use crate::metrics::compute_metrics;
use crate::model::{ItemId, ItemIdKind, SchemaProfile, Snapshot};
use crate::outer;

pub const DEFAULT_BLOCK_SIZE: usize = 1000;
pub const DEFAULT_SEGMENT_SIZE_LIMIT: usize = 64 * 1024 * 1024;
pub const DEFAULT_PROBE_INTERVAL: u64 = 4;
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = crypto::DEFAULT_ITERATIONS;

/// Whether an encoder's stream contexts/CHMs start fresh or are seeded from
/// a prior run's exported state (§9 "model 'continuity' explicitly by
/// passing a `StreamState` value... in and out of each encoder run").
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub schema: Option<SchemaProfile>,
    pub password: Option<String>,
    pub continuity: Option<BTreeMap<u8, StreamState>>,
    pub probe_interval: u64,
    pub segment_size_limit: usize,
    pub block_size: usize,
    pub run_id: Option<String>,
    pub pbkdf2_iterations: u32,
}

impl PackOptions {
    pub fn new() -> Self {
        PackOptions {
            schema: None,
            password: None,
            continuity: None,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            segment_size_limit: DEFAULT_SEGMENT_SIZE_LIMIT,
            block_size: DEFAULT_BLOCK_SIZE,
            run_id: None,
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

/// Portable per-stream state a caller can thread through a sequence of
/// encoder runs in continuity mode. Never touched by a global/static —
/// the caller owns and passes it explicitly (§9 "no mutable module-level
/// state").
#[derive(Debug, Clone)]
pub struct StreamState {
    pub context: BlockContext,
    pub chm: ChmContinuity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Receiving,
    Flushing,
    Finalized,
}

/// Per-block telemetry annotation (§4.7 "telemetry()... per-block
/// annotations").
#[derive(Debug, Clone, Copy)]
pub struct BlockAnnotation {
    pub stream_id: u8,
    pub block_index: u64,
    pub inner_codec: u8,
    pub flags: u8,
}

#[derive(Debug, Clone)]
pub struct StreamTelemetry {
    pub stream_id: u8,
    pub stats: ChmStats,
    pub report: ChmReport,
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    pub streams: Vec<StreamTelemetry>,
    pub blocks: Vec<BlockAnnotation>,
}

struct StreamAccumulator {
    stream_id: u8,
    is_time_like: bool,
    ctx: BlockContext,
    chm: CompressionHealthMonitor,
    block_index: u64,
    manifest: Vec<BlockManifestEntry>,
    raw_payload: Vec<u8>,
    ratio_sum: f64,
    ratio_count: u64,
}

impl StreamAccumulator {
    fn new(stream_id: u8, is_time_like: bool, probe_interval: u64, run_id: String, seed: Option<StreamState>) -> Self {
        let (ctx, chm) = match seed {
            Some(s) => (
                s.context,
                CompressionHealthMonitor::from_continuity(s.chm, probe_interval, run_id, FORMAT_VERSION),
            ),
            None => (
                BlockContext::new(),
                CompressionHealthMonitor::new(probe_interval, run_id, FORMAT_VERSION),
            ),
        };
        StreamAccumulator {
            stream_id,
            is_time_like,
            ctx,
            chm,
            block_index: 0,
            manifest: Vec::new(),
            raw_payload: Vec::new(),
            ratio_sum: 0.0,
            ratio_count: 0,
        }
    }

    fn unique_ratio_estimate(&self) -> f64 {
        if self.ratio_count == 0 {
            0.0
        } else {
            self.ratio_sum / self.ratio_count as f64
        }
    }

    fn reset_segment_buffers(&mut self) {
        self.manifest.clear();
        self.raw_payload.clear();
        self.ratio_sum = 0.0;
        self.ratio_count = 0;
    }
}

/// Select the candidate inner codec for a block, per §4.7 step 4's
/// priority: DICT_VARINT, then RLE_DOD, then BITPACK_DELTA, then the
/// stream-kind default.
fn select_candidate(is_time_like: bool, metrics: &crate::metrics::BlockMetrics, dict_active: bool) -> InnerCodecId {
    if !is_time_like && metrics.unique_ratio < 0.5 && dict_active {
        InnerCodecId::DictVarint
    } else if metrics.zero_dod_ratio > 0.9 {
        InnerCodecId::RleDod
    } else if metrics.p90_abs_delta < 127.0 {
        InnerCodecId::BitpackDelta
    } else if is_time_like {
        InnerCodecId::DodVarint
    } else {
        InnerCodecId::VarintDelta
    }
}

pub struct Encoder {
    state: EncoderState,
    schema: SchemaProfile,
    options: PackOptions,
    streams: BTreeMap<u8, StreamAccumulator>,
    pending: Vec<Snapshot>,
    segment_id: u32,
    out: Vec<u8>,
    running_hash: RunningSha256,
    string_table: Vec<String>,
    string_lookup: BTreeMap<String, u32>,
    segment_numeric_ids: Vec<i64>,
    segment_string_ids: Vec<String>,
    block_annotations: Vec<BlockAnnotation>,
    password_key: Option<([u8; crypto::KEY_LEN], [u8; crypto::FILE_NONCE_LEN])>,
    pending_salt: Option<[u8; crypto::SALT_LEN]>,
    run_id: String,
}

impl Encoder {
    pub fn new(options: PackOptions) -> Self {
        let schema = options.schema.clone().unwrap_or_else(SchemaProfile::legacy);
        let run_id = options.run_id.clone().unwrap_or_else(|| {
            let mut bytes = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut bytes);
            hex::encode(bytes)
        });

        let probe_interval = options.probe_interval.max(1);
        let mut continuity = options.continuity.clone().unwrap_or_default();

        let mut streams = BTreeMap::new();
        let mut seed_for = |id: u8, map: &mut BTreeMap<u8, StreamState>| map.remove(&id);

        streams.insert(
            STREAM_ID_TIME,
            StreamAccumulator::new(STREAM_ID_TIME, true, probe_interval, run_id.clone(), seed_for(STREAM_ID_TIME, &mut continuity)),
        );
        streams.insert(
            STREAM_ID_SNAPSHOT_LEN,
            StreamAccumulator::new(STREAM_ID_SNAPSHOT_LEN, false, probe_interval, run_id.clone(), seed_for(STREAM_ID_SNAPSHOT_LEN, &mut continuity)),
        );
        streams.insert(
            STREAM_ID_ITEM_ID,
            StreamAccumulator::new(STREAM_ID_ITEM_ID, false, probe_interval, run_id.clone(), seed_for(STREAM_ID_ITEM_ID, &mut continuity)),
        );
        streams.insert(
            STREAM_ID_VALUE,
            StreamAccumulator::new(STREAM_ID_VALUE, false, probe_interval, run_id.clone(), seed_for(STREAM_ID_VALUE, &mut continuity)),
        );
        streams.insert(
            STREAM_ID_QUANTITY,
            StreamAccumulator::new(STREAM_ID_QUANTITY, false, probe_interval, run_id.clone(), seed_for(STREAM_ID_QUANTITY, &mut continuity)),
        );
        for (field, stream_id) in schema.extra_fields() {
            let is_time_like = field.codec_hint == Some(crate::model::CodecHint::Time);
            streams.insert(
                stream_id,
                StreamAccumulator::new(stream_id, is_time_like, probe_interval, run_id.clone(), seed_for(stream_id, &mut continuity)),
            );
        }

        let password_key = options.password.as_ref().map(|pwd| {
            let mut salt = [0u8; crypto::SALT_LEN];
            let mut file_nonce = [0u8; crypto::FILE_NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            rand::thread_rng().fill_bytes(&mut file_nonce);
            let key = derive_key(pwd, &salt, options.pbkdf2_iterations);
            (key, file_nonce, salt)
        });
        // Re-shape into (key, file_nonce) plus stash salt for the header write below.
        let (password_key, salt) = match password_key {
            Some((k, n, s)) => (Some((k, n)), Some(s)),
            None => (None, None),
        };

        Encoder {
            state: EncoderState::Receiving,
            schema,
            options,
            streams,
            pending: Vec::new(),
            segment_id: 0,
            out: Vec::new(),
            running_hash: RunningSha256::new(),
            string_table: Vec::new(),
            string_lookup: BTreeMap::new(),
            segment_numeric_ids: Vec::new(),
            segment_string_ids: Vec::new(),
            block_annotations: Vec::new(),
            password_key,
            pending_salt: salt,
            run_id,
        }
    }

    /// Buffer one snapshot. Valid only while `Receiving` (§4.11).
    pub fn add_snapshot(&mut self, snapshot: Snapshot) -> Result<(), EngineError> {
        if self.state != EncoderState::Receiving {
            return Err(EngineError::usage("add_snapshot called after finish"));
        }
        self.pending.push(snapshot);
        Ok(())
    }

    fn intern_string(&mut self, s: &str) -> i64 {
        if let Some(&idx) = self.string_lookup.get(s) {
            return idx as i64;
        }
        let idx = self.string_table.len() as u32;
        self.string_table.push(s.to_string());
        self.string_lookup.insert(s.to_string(), idx);
        idx as i64
    }

    fn write_and_hash(&mut self, bytes: &[u8]) {
        self.running_hash.update(bytes);
        self.out.extend_from_slice(bytes);
    }

    /// Finalize the file: process all buffered snapshots into blocks,
    /// segments, and the EOS trailer. Idempotency is *not* granted — a
    /// second call is a `UsageError` (§7's error table takes precedence
    /// over §4.7's "idempotent after first call" phrasing; see DESIGN.md).
    pub fn finish(&mut self) -> Result<Vec<u8>, EngineError> {
        if self.state == EncoderState::Finalized {
            return Err(EngineError::usage("finish called twice"));
        }
        self.state = EncoderState::Flushing;

        let block_size = self.options.block_size.max(1);
        let segment_size_limit = self.options.segment_size_limit.max(1);

        let header = FileHeader {
            version: FORMAT_VERSION,
            flags: self.flags_preview(),
            stream_count: self.streams.len() as u16,
        };
        let mut preamble = Vec::new();
        header.write(&mut preamble);
        if header.has_schema() {
            format::write_schema_blob(&self.schema, &mut preamble).map_err(EngineError::from)?;
        }
        self.write_and_hash(&preamble);

        // String table and encryption header placement is finalized once we
        // know whether any string item ids were actually seen — but both
        // flags must be decided before the first byte goes out, so we do a
        // dry pass over `pending` first to discover string ids and pick the
        // flags up front (this does not affect output bytes, only which
        // optional sections are present).
        if self.schema.item_id_kind == ItemIdKind::String {
            for snap in &self.pending {
                for (id, _) in &snap.items {
                    if let ItemId::String(s) = id {
                        self.intern_string(s);
                    }
                }
            }
        }

        if !self.string_table.is_empty() {
            let mut st_buf = Vec::new();
            let table = format::StringTable { strings: self.string_table.clone() };
            table.write(&mut st_buf);
            self.write_and_hash(&st_buf);
        }

        let enc_header = if let Some((key, file_nonce)) = self.password_key {
            let salt = self.pending_salt.take().unwrap_or([0u8; crypto::SALT_LEN]);
            let auth_verify = crypto::compute_auth_verify(&key);
            let h = EncHeader {
                enc_mode: 1,
                salt,
                auth_verify,
                kdf_id: 0,
                iterations: self.options.pbkdf2_iterations,
                digest_id: 0,
                file_nonce,
            };
            let mut buf = Vec::new();
            h.write(&mut buf);
            self.write_and_hash(&buf);
            Some((key, file_nonce))
        } else {
            None
        };

        let pending = std::mem::take(&mut self.pending);
        for chunk in pending.chunks(block_size) {
            self.process_chunk(chunk)?;
            let total_raw: usize = self.streams.values().map(|s| s.raw_payload.len()).sum();
            if total_raw >= segment_size_limit {
                self.flush_segment(enc_header)?;
            }
        }
        let total_raw: usize = self.streams.values().map(|s| s.raw_payload.len()).sum();
        let any_manifest = self.streams.values().any(|s| !s.manifest.is_empty());
        if total_raw > 0 || any_manifest {
            self.flush_segment(enc_header)?;
        }

        let file_hash = self.running_hash.clone().finalize();
        let crc = crate::bitio::crc32(&self.out);
        let trailer = EosTrailer { file_hash, crc32: crc };
        let mut trailer_bytes = Vec::new();
        trailer.write(&mut trailer_bytes);
        self.out.extend_from_slice(&trailer_bytes);

        self.state = EncoderState::Finalized;
        Ok(self.out.clone())
    }

    fn flags_preview(&self) -> u32 {
        let mut flags = 0u32;
        if self.options.schema.is_some() {
            flags |= FLAG_HAS_SCHEMA;
        }
        if self.schema.item_id_kind == ItemIdKind::String {
            flags |= FLAG_HAS_STRING_TABLE;
        }
        if self.password_key.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        flags
    }

    fn process_chunk(&mut self, chunk: &[Snapshot]) -> Result<(), EngineError> {
        if chunk.is_empty() {
            return Ok(());
        }

        let times: Vec<i64> = chunk.iter().map(|s| s.timestamp).collect();
        let lens: Vec<i64> = chunk.iter().map(|s| s.items.len() as i64).collect();

        let extra_field_names: Vec<(String, u8)> =
            self.schema.extra_fields().into_iter().map(|(f, id)| (f.name.clone(), id)).collect();

        let mut item_ids: Vec<i64> = Vec::new();
        let mut values: Vec<f64> = Vec::new();
        let mut quantities: Vec<f64> = Vec::new();
        let mut extras: BTreeMap<u8, Vec<f64>> = BTreeMap::new();
        for (_, stream_id) in &extra_field_names {
            extras.insert(*stream_id, Vec::new());
        }

        for snap in chunk {
            for (idx, (id, record)) in snap.items.iter().enumerate() {
                let id_code = match id {
                    ItemId::Numeric(n) => *n,
                    ItemId::String(s) => {
                        self.segment_string_ids.push(s.clone());
                        self.intern_string(s)
                    }
                };
                if matches!(id, ItemId::Numeric(_)) {
                    self.segment_numeric_ids.push(id_code);
                }
                item_ids.push(id_code);
                values.push(record.price);
                quantities.push(record.quantity);
                for (name, stream_id) in &extra_field_names {
                    let v = snap
                        .extra_fields
                        .get(name)
                        .and_then(|vec| vec.get(idx))
                        .copied()
                        .unwrap_or(0.0);
                    extras.get_mut(stream_id).unwrap().push(v);
                }
            }
        }

        self.process_int_stream(STREAM_ID_TIME, &times)?;
        self.process_int_stream(STREAM_ID_SNAPSHOT_LEN, &lens)?;
        self.process_int_stream(STREAM_ID_ITEM_ID, &item_ids)?;
        self.process_float_stream(STREAM_ID_VALUE, &values)?;
        self.process_float_stream(STREAM_ID_QUANTITY, &quantities)?;
        for (stream_id, raw) in extras {
            self.process_float_stream(stream_id, &raw)?;
        }
        Ok(())
    }

    fn process_int_stream(&mut self, stream_id: u8, raw: &[i64]) -> Result<(), EngineError> {
        if raw.is_empty() {
            return Ok(());
        }
        let acc = self.streams.get_mut(&stream_id).expect("stream accumulator exists");
        let annotation = process_block(acc, raw)?;
        self.block_annotations.push(annotation);
        Ok(())
    }

    fn process_float_stream(&mut self, stream_id: u8, raw: &[f64]) -> Result<(), EngineError> {
        if raw.is_empty() {
            return Ok(());
        }
        let acc = self.streams.get_mut(&stream_id).expect("stream accumulator exists");
        if f64_block_is_integerizable(raw) {
            let ints = f64_block_to_i64(raw);
            let annotation = process_block(acc, &ints)?;
            self.block_annotations.push(annotation);
        } else {
            let bits = f64_block_to_bits(raw);
            let payload = encode_block(InnerCodecId::Fixed64Le, &bits, &mut acc.ctx)?;
            acc.manifest.push(BlockManifestEntry {
                stream_id,
                inner_codec: InnerCodecId::Fixed64Le.as_u8(),
                n_items: bits.len() as u32,
                payload_len: payload.len() as u32,
                flags: 0,
            });
            self.block_annotations.push(BlockAnnotation {
                stream_id,
                block_index: acc.block_index,
                inner_codec: InnerCodecId::Fixed64Le.as_u8(),
                flags: 0,
            });
            acc.raw_payload.extend_from_slice(&payload);
            acc.block_index += 1;
        }
        Ok(())
    }

    fn flush_segment(&mut self, enc: Option<([u8; crypto::KEY_LEN], [u8; crypto::FILE_NONCE_LEN])>) -> Result<(), EngineError> {
        let segment_id = self.segment_id;

        // Every live stream's outer codec choice depends only on that
        // stream's own payload, so the compression pass itself can run
        // through `perf::compress_sections` (parallel under the `parallel`
        // feature, sequential otherwise) without affecting output bytes.
        let mut stream_order: Vec<u8> = Vec::new();
        let mut jobs: Vec<crate::perf::SectionJob> = Vec::new();
        for (&stream_id, acc) in self.streams.iter() {
            if acc.manifest.is_empty() {
                continue;
            }
            stream_order.push(stream_id);
            let outer_codec = outer::choose_outer_codec(acc.raw_payload.len(), acc.unique_ratio_estimate());
            jobs.push(crate::perf::SectionJob { stream_id, outer_codec, raw_payload: &acc.raw_payload });
        }
        let compressed_by_stream: BTreeMap<u8, (u8, Vec<u8>)> = {
            let outer_codecs: BTreeMap<u8, u8> = jobs.iter().map(|j| (j.stream_id, j.outer_codec)).collect();
            crate::perf::compress_sections(&jobs)
                .map_err(|e| EngineError::format(e.to_string()))?
                .into_iter()
                .map(|c| {
                    let codec = outer_codecs[&c.stream_id];
                    (c.stream_id, (codec, c.compressed))
                })
                .collect()
        };

        let mut sections = Vec::new();
        let mut stream_count = 0u16;

        for stream_id in stream_order {
            let (outer_codec, compressed) = compressed_by_stream.get(&stream_id).expect("compressed section present").clone();
            let acc = self.streams.get_mut(&stream_id).expect("stream accumulator exists");
            stream_count += 1;
            let stored = if let Some((key, file_nonce)) = enc {
                let iv = crypto::derive_section_iv(&key, &file_nonce, stream_id, segment_id);
                crypto::encrypt_section(&key, &iv, &compressed, format::aad_tag())?
            } else {
                compressed
            };
            let section_hash = crate::bitio::sha256(&stored);
            let section_header = StreamSectionHeader {
                stream_id,
                outer_codec,
                block_count: acc.manifest.len() as u16,
                uncompressed_len: acc.raw_payload.len() as u32,
                compressed_len: stored.len() as u32,
                section_hash,
            };
            let mut section_bytes = Vec::new();
            section_header.write(&mut section_bytes);
            for entry in &acc.manifest {
                entry.write(&mut section_bytes);
            }
            section_bytes.extend_from_slice(&stored);
            sections.push(section_bytes);
            acc.reset_segment_buffers();
        }

        let mut body = Vec::new();
        let index_offset = sections.iter().map(|s| s.len()).sum::<usize>() as u32;
        let header = SegmentHeader::new(index_offset, segment_id, stream_count);
        header.write(&mut body);
        for s in &sections {
            body.extend_from_slice(s);
        }

        let index = if !self.segment_numeric_ids.is_empty() {
            SegmentIndex::build_numeric(std::mem::take(&mut self.segment_numeric_ids))
        } else {
            SegmentIndex::build_string(std::mem::take(&mut self.segment_string_ids))
        };
        index.write(&mut body);

        let segment_hash = crate::bitio::sha256(&body);
        let crc = crate::bitio::crc32(&body);
        let footer = SegmentFooter { segment_hash, crc32: crc };
        let mut footer_bytes = Vec::new();
        footer.write(&mut footer_bytes);
        body.extend_from_slice(&footer_bytes);

        self.write_and_hash(&body);
        self.segment_id += 1;
        Ok(())
    }

    /// Read-only snapshot of CHM state and per-block annotations, valid
    /// once `finish()` has produced output (§4.11).
    pub fn telemetry(&self) -> Result<Telemetry, EngineError> {
        if self.state == EncoderState::Receiving {
            return Err(EngineError::usage("telemetry requested before finish()"));
        }
        let streams = self
            .streams
            .iter()
            .map(|(&stream_id, acc)| StreamTelemetry {
                stream_id,
                stats: acc.chm.stats().clone(),
                report: acc.chm.report(),
            })
            .collect();
        Ok(Telemetry { streams, blocks: self.block_annotations.clone() })
    }

    /// Export per-stream context + CHM continuity state, for threading into
    /// a subsequent encoder run (§9).
    pub fn export_continuity(&self) -> BTreeMap<u8, StreamState> {
        self.streams
            .iter()
            .map(|(&id, acc)| (id, StreamState { context: acc.ctx.clone(), chm: acc.chm.export_continuity() }))
            .collect()
    }
}

/// Process one block for an integer-valued stream: candidate selection,
/// CHM routing, and the single real `BlockContext` mutation (§4.7 steps
/// 2-8, §3 invariants on context isolation).
///
/// The candidate is always encoded first against a *forked* context so its
/// ratio can be measured without touching the stream's real state. On a
/// CORE decision the fork becomes the real context (its mutation is
/// identical to what encoding directly would have produced, since both
/// start from the same pre-block state). On QUARANTINE the real context —
/// still untouched — is mutated once, by the safe codec only.
fn process_block(acc: &mut StreamAccumulator, raw: &[i64]) -> Result<BlockAnnotation, EngineError> {
    let metrics = compute_metrics(raw);
    let dict_active = !acc.ctx.dict.is_empty();
    let candidate = select_candidate(acc.is_time_like, &metrics, dict_active);

    let mut forked = acc.ctx.fork();
    let candidate_payload = encode_block(candidate, raw, &mut forked)?;
    let raw_bytes = (raw.len() * 8) as f64;
    let candidate_ratio = raw_bytes / (candidate_payload.len() as f64 + BLOCK_MANIFEST_ENTRY_LEN as f64);

    let route = acc.chm.decide_route(&metrics, candidate_ratio, acc.block_index);

    let (final_codec, final_payload, final_ratio) = if route == Route::Core {
        acc.ctx = forked;
        (candidate, candidate_payload, candidate_ratio)
    } else {
        let safe = if acc.is_time_like { InnerCodecId::DodVarint } else { InnerCodecId::VarintDelta };
        let payload = encode_block(safe, raw, &mut acc.ctx)?;
        let ratio = raw_bytes / (payload.len() as f64 + BLOCK_MANIFEST_ENTRY_LEN as f64);
        (safe, payload, ratio)
    };

    let flags = acc.chm.update(route, &metrics, final_ratio, acc.block_index, raw_bytes as u64, final_payload.len() as u64);

    acc.manifest.push(BlockManifestEntry {
        stream_id: acc.stream_id,
        inner_codec: final_codec.as_u8(),
        n_items: raw.len() as u32,
        payload_len: final_payload.len() as u32,
        flags,
    });
    let annotation = BlockAnnotation { stream_id: acc.stream_id, block_index: acc.block_index, inner_codec: final_codec.as_u8(), flags };
    acc.raw_payload.extend_from_slice(&final_payload);
    acc.ratio_sum += metrics.unique_ratio;
    acc.ratio_count += 1;
    acc.block_index += 1;
    Ok(annotation)
}

pub fn pack(snapshots: Vec<Snapshot>, options: PackOptions) -> Result<Vec<u8>, EngineError> {
    let mut encoder = Encoder::new(options);
    for s in snapshots {
        encoder.add_snapshot(s)?;
    }
    encoder.finish()
}

/// Like [`pack`], but also returns the CHM telemetry collected while
/// finishing — for callers (the CLI's `--verbose` pack) that want the
/// per-stream anomaly report without holding on to the `Encoder` itself.
pub fn pack_with_telemetry(snapshots: Vec<Snapshot>, options: PackOptions) -> Result<(Vec<u8>, Telemetry), EngineError> {
    let mut encoder = Encoder::new(options);
    for s in snapshots {
        encoder.add_snapshot(s)?;
    }
    let bytes = encoder.finish()?;
    let telemetry = encoder.telemetry()?;
    Ok((bytes, telemetry))
}
