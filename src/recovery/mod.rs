//! Index-bypass recovery scanner (a supplemented, non-core feature): produce
//! a best-effort health report for a `.gics` file that does not require its
//! EOS trailer, or any individual segment's hash/CRC, to still validate.
//!
//! Modeled on the teacher's `recovery::scanner`, adapted to this engine's
//! framing. Where the teacher resyncs on fixed-size 84-byte block headers,
//! the recoverable unit here is the *segment* — each one self-describing via
//! its own `"SG"`-tagged header, hashed footer, and the outer codec ids its
//! stream sections declare. `scan()` never panics and never fails outright
//! on corrupt input: every problem a segment can have is encoded as a
//! [`BlockHealth`] variant in the returned [`RecoveryReport`]. Only a
//! genuinely empty or pre-header-truncated buffer yields a report with zero
//! scanned segments.
//!
//! This module is a pure diagnostic: it is never called by `pack`, `unpack`,
//! or `verify`, which stay strict about integrity per the decoder's own
//! `IntegrityMode`.

use std::io;
use std::path::Path;

use crate::format::segment::{SegmentFooter, SegmentHeader, SegmentIndex, StreamSectionHeader};
use crate::format::{self, FileHeader, OUTER_CODEC_NONE, OUTER_CODEC_ZSTD};

/// Health verdict for one scanned segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockHealth {
    /// Header, every stream section, the index, and the footer hash/CRC all
    /// check out.
    Healthy,
    /// The `"SG"` magic or segment header fields didn't parse, or the
    /// footer's hash/CRC didn't match the segment body.
    HeaderCorrupt,
    /// The header parsed but fewer bytes follow than its sections, index,
    /// and footer declare.
    TruncatedPayload { declared: u64, available: u64 },
    /// A stream section declared an outer codec id this build doesn't know.
    UnknownOuterCodec { codec: u8 },
}

impl BlockHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, BlockHealth::Healthy)
    }
}

/// Diagnostic record for one scanned segment position.
#[derive(Debug, Clone)]
pub struct ScannedBlock {
    /// Absolute byte offset of this segment's header in the file.
    pub file_offset: u64,
    /// Parsed segment id, when the header itself parsed.
    pub segment_id: Option<u32>,
    /// Parsed stream count, when the header itself parsed.
    pub stream_count: Option<u16>,
    pub health: BlockHealth,
}

impl ScannedBlock {
    pub fn is_usable(&self) -> bool {
        self.health.is_usable()
    }
}

/// Overall quality of the recovery scan result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryQuality {
    /// All segments healthy.
    Full,
    /// Some segments corrupt or truncated; snapshots from those segments
    /// are lost but earlier/later segments remain usable.
    Partial,
    /// Fewer than half the segments are healthy; the file header itself
    /// parsed but essentially nothing past it survived.
    HeaderOnly,
    /// No segments could even be located.
    Catastrophic,
}

/// Complete report produced by [`scan`].
#[derive(Debug)]
pub struct RecoveryReport {
    /// Total segments scanned (healthy + corrupt + truncated).
    pub total_scanned: usize,
    pub healthy_segments: usize,
    pub corrupt_segments: usize,
    pub truncated_segments: usize,
    pub unknown_codec_segments: usize,
    /// Bytes of the file actually consumed while scanning (from byte 0
    /// through the last segment attempted).
    pub bytes_scanned: u64,
    /// Per-segment diagnostic records, in scan order.
    pub block_log: Vec<ScannedBlock>,
    /// Sum of `TIME` stream item counts across healthy segments — a
    /// best-effort estimate of how many snapshots a full `unpack()` of the
    /// healthy segments alone would recover.
    pub recoverable_snapshots: u64,
    pub quality: RecoveryQuality,
}

impl RecoveryReport {
    /// Percentage of segments that are healthy (0.0-100.0).
    pub fn health_pct(&self) -> f64 {
        if self.total_scanned == 0 {
            return 0.0;
        }
        self.healthy_segments as f64 / self.total_scanned as f64 * 100.0
    }

    /// One-line summary suitable for CLI display.
    pub fn summary(&self) -> String {
        format!(
            "{:?} recovery: {}/{} segments healthy ({:.1}%), ~{} snapshot(s) recoverable, {} bytes scanned",
            self.quality,
            self.healthy_segments,
            self.total_scanned,
            self.health_pct(),
            self.recoverable_snapshots,
            self.bytes_scanned,
        )
    }
}

const KNOWN_OUTER_CODECS: [u8; 2] = [OUTER_CODEC_NONE, OUTER_CODEC_ZSTD];

/// Segment header is 2-byte magic + 12 fixed bytes (§ segment framing).
const SEGMENT_HEADER_ON_DISK_LEN: u64 = 2 + 12;

/// Attempt a full structural walk of one segment starting at `header_start`.
///
/// Returns `None` if the bytes at `header_start` aren't even a parseable
/// segment header (caller resyncs by advancing one byte). Returns
/// `Some((end_offset, block, recoverable_snapshots))` otherwise — `end_offset`
/// is where scanning should resume, which is the computed end of this
/// segment when the walk completed cleanly, or `header_start + 1` when it had
/// to give up partway through (so the next attempt resyncs from just past
/// the corrupt/truncated header rather than assuming the segment's claimed
/// length is trustworthy).
fn scan_one_segment(buf: &[u8], header_start: u64) -> Option<(u64, ScannedBlock, u64)> {
    let start = header_start as usize;
    let mut pos = start;
    let seg_header = match SegmentHeader::read(buf, &mut pos) {
        Ok(h) => h,
        Err(_) => return None,
    };

    let mut recoverable_snapshots = 0u64;
    let mut unknown_codec: Option<u8> = None;

    for _ in 0..seg_header.stream_count {
        let section_start = pos;
        let section_header = match StreamSectionHeader::read(buf, &mut pos) {
            Ok(h) => h,
            Err(_) => {
                let declared = (section_start - start) as u64 + 1;
                let available = (buf.len() - start) as u64;
                let block = ScannedBlock {
                    file_offset: header_start,
                    segment_id: Some(seg_header.segment_id),
                    stream_count: Some(seg_header.stream_count),
                    health: BlockHealth::TruncatedPayload { declared, available },
                };
                return Some((header_start + 1, block, 0));
            }
        };
        if !KNOWN_OUTER_CODECS.contains(&section_header.outer_codec) {
            unknown_codec = Some(section_header.outer_codec);
        }

        for _ in 0..section_header.block_count {
            if format::take(buf, &mut pos, crate::format::segment::BLOCK_MANIFEST_ENTRY_LEN).is_err() {
                let block = ScannedBlock {
                    file_offset: header_start,
                    segment_id: Some(seg_header.segment_id),
                    stream_count: Some(seg_header.stream_count),
                    health: BlockHealth::TruncatedPayload {
                        declared: (pos - start) as u64,
                        available: (buf.len() - start) as u64,
                    },
                };
                return Some((header_start + 1, block, 0));
            }
        }

        if section_header.stream_id == format::STREAM_ID_TIME {
            let manifest_start = section_start + 2 + 2 + 4 + 4 + 32;
            let mut mpos = manifest_start;
            let mut count = 0u64;
            for _ in 0..section_header.block_count {
                if let Ok(entry) = crate::format::segment::BlockManifestEntry::read(buf, &mut mpos) {
                    count += entry.n_items as u64;
                }
            }
            recoverable_snapshots = count;
        }

        if format::take(buf, &mut pos, section_header.compressed_len as usize).is_err() {
            let block = ScannedBlock {
                file_offset: header_start,
                segment_id: Some(seg_header.segment_id),
                stream_count: Some(seg_header.stream_count),
                health: BlockHealth::TruncatedPayload {
                    declared: (pos - start) as u64 + section_header.compressed_len as u64,
                    available: (buf.len() - start) as u64,
                },
            };
            return Some((header_start + 1, block, 0));
        }
    }

    let expected_index_pos = start + SEGMENT_HEADER_ON_DISK_LEN as usize + seg_header.index_offset as usize;
    if pos != expected_index_pos {
        let block = ScannedBlock {
            file_offset: header_start,
            segment_id: Some(seg_header.segment_id),
            stream_count: Some(seg_header.stream_count),
            health: BlockHealth::HeaderCorrupt,
        };
        return Some((header_start + 1, block, 0));
    }

    if SegmentIndex::read(buf, &mut pos).is_err() {
        let block = ScannedBlock {
            file_offset: header_start,
            segment_id: Some(seg_header.segment_id),
            stream_count: Some(seg_header.stream_count),
            health: BlockHealth::TruncatedPayload {
                declared: (pos - start) as u64,
                available: (buf.len() - start) as u64,
            },
        };
        return Some((header_start + 1, block, 0));
    }

    let footer_start = pos;
    let footer = match SegmentFooter::read(buf, &mut pos) {
        Ok(f) => f,
        Err(_) => {
            let block = ScannedBlock {
                file_offset: header_start,
                segment_id: Some(seg_header.segment_id),
                stream_count: Some(seg_header.stream_count),
                health: BlockHealth::TruncatedPayload {
                    declared: (pos - start) as u64,
                    available: (buf.len() - start) as u64,
                },
            };
            return Some((header_start + 1, block, 0));
        }
    };

    let body = &buf[start..footer_start];
    let observed_crc = crate::bitio::crc32(body);
    let observed_hash = crate::bitio::sha256(body);
    let hashes_match = observed_crc == footer.crc32 && observed_hash == footer.segment_hash;

    let health = if !hashes_match {
        BlockHealth::HeaderCorrupt
    } else if let Some(codec) = unknown_codec {
        BlockHealth::UnknownOuterCodec { codec }
    } else {
        BlockHealth::Healthy
    };

    let block = ScannedBlock {
        file_offset: header_start,
        segment_id: Some(seg_header.segment_id),
        stream_count: Some(seg_header.stream_count),
        health,
    };
    let recoverable = if block.is_usable() { recoverable_snapshots } else { 0 };
    Some((pos as u64, block, recoverable))
}

/// Scan a whole `.gics` file buffer for recoverable segments.
///
/// Unlike `unpack()`/`verify()`, this never requires the EOS trailer, the
/// file-level hash, or any one segment's hash to hold — a corrupt or
/// truncated file still yields a report describing which segments (if any)
/// can be trusted.
pub fn scan(buf: &[u8]) -> RecoveryReport {
    let mut pos = 0usize;
    let header = match FileHeader::read(buf, &mut pos) {
        Ok(h) => h,
        Err(_) => {
            return RecoveryReport {
                total_scanned: 0,
                healthy_segments: 0,
                corrupt_segments: 0,
                truncated_segments: 0,
                unknown_codec_segments: 0,
                bytes_scanned: 0,
                block_log: Vec::new(),
                recoverable_snapshots: 0,
                quality: RecoveryQuality::Catastrophic,
            };
        }
    };

    // Skip the schema blob / string table / encryption header the same way
    // the decoder does, to locate the first segment. If any of these fail to
    // parse we know the file header but nothing about its contents.
    let located = (|| -> Result<usize, ()> {
        if header.has_schema() {
            format::read_schema_blob(buf, &mut pos).map_err(|_| ())?;
        }
        if header.flags & format::FLAG_HAS_STRING_TABLE != 0 {
            format::StringTable::read(buf, &mut pos).map_err(|_| ())?;
        }
        if header.is_encrypted() {
            format::EncHeader::read(buf, &mut pos).map_err(|_| ())?;
        }
        Ok(pos)
    })();

    let segments_start = match located {
        Ok(p) => p,
        Err(()) => {
            return RecoveryReport {
                total_scanned: 0,
                healthy_segments: 0,
                corrupt_segments: 0,
                truncated_segments: 0,
                unknown_codec_segments: 0,
                bytes_scanned: pos as u64,
                block_log: Vec::new(),
                recoverable_snapshots: 0,
                quality: RecoveryQuality::HeaderOnly,
            };
        }
    };

    // The file's trailing EOS_TRAILER_LEN bytes are not segment data even if
    // they happen to contain what looks like a header.
    let scan_end = buf.len().saturating_sub(format::EOS_TRAILER_LEN);

    let mut cur = segments_start as u64;
    let mut block_log: Vec<ScannedBlock> = Vec::new();
    let mut healthy_segments = 0usize;
    let mut corrupt_segments = 0usize;
    let mut truncated_segments = 0usize;
    let mut unknown_codec_segments = 0usize;
    let mut recoverable_snapshots = 0u64;
    let mut bytes_scanned = segments_start as u64;

    while (cur as usize) + SEGMENT_HEADER_ON_DISK_LEN as usize <= scan_end {
        match scan_one_segment(&buf[..scan_end], cur) {
            None => {
                // Not a parseable segment header here; resync one byte
                // forward and keep looking for the next "SG" magic.
                cur += 1;
                bytes_scanned = cur;
            }
            Some((end, block, recovered)) => {
                match &block.health {
                    BlockHealth::Healthy => healthy_segments += 1,
                    BlockHealth::HeaderCorrupt => corrupt_segments += 1,
                    BlockHealth::TruncatedPayload { .. } => truncated_segments += 1,
                    BlockHealth::UnknownOuterCodec { .. } => unknown_codec_segments += 1,
                }
                recoverable_snapshots += recovered;
                bytes_scanned = end;
                block_log.push(block);
                cur = end;
            }
        }
    }

    let total_scanned = block_log.len();
    let quality = if total_scanned == 0 {
        RecoveryQuality::Catastrophic
    } else {
        let pct = healthy_segments as f64 / total_scanned as f64;
        if pct >= 0.95 {
            RecoveryQuality::Full
        } else if pct >= 0.50 {
            RecoveryQuality::Partial
        } else {
            RecoveryQuality::HeaderOnly
        }
    };

    RecoveryReport {
        total_scanned,
        healthy_segments,
        corrupt_segments,
        truncated_segments,
        unknown_codec_segments,
        bytes_scanned,
        block_log,
        recoverable_snapshots,
        quality,
    }
}

/// Convenience: scan a file at `path` and return the report.
pub fn scan_file(path: &Path) -> io::Result<RecoveryReport> {
    let bytes = std::fs::read(path)?;
    Ok(scan(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{pack, PackOptions};
    use crate::model::{FieldRecord, ItemId, Snapshot};

    fn sample_snapshots() -> Vec<Snapshot> {
        (0..20)
            .map(|i| {
                Snapshot::new(1_700_000_000 + i)
                    .with_item(ItemId::Numeric(1), FieldRecord { price: 100.0 + i as f64, quantity: 10.0 })
                    .with_item(ItemId::Numeric(2), FieldRecord { price: 200.0 + i as f64, quantity: 20.0 })
            })
            .collect()
    }

    #[test]
    fn intact_file_scans_fully_healthy() {
        let snaps = sample_snapshots();
        let bytes = pack(snaps.clone(), PackOptions::new()).unwrap();
        let report = scan(&bytes);
        assert_eq!(report.quality, RecoveryQuality::Full);
        assert!(report.total_scanned >= 1);
        assert_eq!(report.corrupt_segments, 0);
        assert_eq!(report.truncated_segments, 0);
        assert_eq!(report.recoverable_snapshots, snaps.len() as u64);
    }

    #[test]
    fn truncated_file_is_not_catastrophic_but_not_full() {
        let snaps = sample_snapshots();
        let bytes = pack(snaps, PackOptions::new()).unwrap();
        let cut = &bytes[..bytes.len() - 20];
        let report = scan(cut);
        assert_ne!(report.quality, RecoveryQuality::Full);
    }

    #[test]
    fn bit_flip_in_segment_body_is_detected_as_corrupt() {
        let snaps = sample_snapshots();
        let mut bytes = pack(snaps, PackOptions::new()).unwrap();
        // Flip a byte well inside the first segment's body, past the file
        // header and before the EOS trailer.
        let target = bytes.len() / 2;
        bytes[target] ^= 0xFF;
        let report = scan(&bytes);
        assert!(report.corrupt_segments > 0 || report.truncated_segments > 0);
    }

    #[test]
    fn garbage_buffer_is_catastrophic() {
        let report = scan(b"not a gics file at all");
        assert_eq!(report.quality, RecoveryQuality::Catastrophic);
        assert_eq!(report.total_scanned, 0);
    }

    #[test]
    fn health_pct_of_empty_scan_is_zero() {
        let report = scan(b"");
        assert_eq!(report.health_pct(), 0.0);
    }
}
