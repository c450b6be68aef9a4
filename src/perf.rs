//! Performance utilities: optional parallel outer-compression across a
//! segment's independent stream sections, and a buffered output sink for
//! sequential segment writes (§5 "the engine writes sequentially without
//! seeking").
//!
//! A segment's stream sections are mutually independent — each stream's
//! outer codec choice and payload bytes depend only on that stream's own
//! metrics and raw payload (§4.7). That makes outer-compression an
//! embarrassingly parallel step: compressing sections concurrently can
//! never change which bytes end up in the file, only how fast they get
//! there (§5 "parallelism must not alter output bytes").

use std::io::{self, Write};

use crate::outer::{self, OuterCodecError};

/// One stream section's payload, ready for outer compression.
pub struct SectionJob<'a> {
    pub stream_id: u8,
    pub outer_codec: u8,
    pub raw_payload: &'a [u8],
}

pub struct CompressedSection {
    pub stream_id: u8,
    pub compressed: Vec<u8>,
}

/// Compress each stream section's raw payload independently.
///
/// With the `parallel` feature enabled this fans the work out across
/// streams using Rayon; without it, it falls back to a plain sequential
/// loop. Both paths produce byte-identical output for the same `jobs`
/// slice, in the same order — only wall-clock time differs.
pub fn compress_sections(jobs: &[SectionJob]) -> Result<Vec<CompressedSection>, OuterCodecError> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        jobs.par_iter()
            .map(|job| {
                let compressed = outer::compress(job.outer_codec, job.raw_payload)?;
                Ok(CompressedSection { stream_id: job.stream_id, compressed })
            })
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        jobs.iter()
            .map(|job| {
                let compressed = outer::compress(job.outer_codec, job.raw_payload)?;
                Ok(CompressedSection { stream_id: job.stream_id, compressed })
            })
            .collect()
    }
}

// ── Write buffer ─────────────────────────────────────────────────────────────

/// Buffered writer with a configurable flush threshold.
///
/// Accumulates writes up to `capacity` bytes and flushes to the underlying
/// writer when the buffer is full or when `flush()` is called explicitly.
/// The engine's own `pack()` builds its output in memory (§5 "a single
/// whole-file in-memory buffer is used"), but a caller streaming segments
/// straight to a file descriptor can wrap that sink in a `WriteBuffer` to
/// avoid one small `write` syscall per segment.
pub struct WriteBuffer<W: Write> {
    inner: W,
    buf: Vec<u8>,
    capacity: usize,
    pub bytes_written: u64,
}

impl<W: Write> WriteBuffer<W> {
    /// Create a new `WriteBuffer` with the given capacity in bytes.
    pub fn new(inner: W, capacity: usize) -> Self {
        Self { inner, buf: Vec::with_capacity(capacity), capacity, bytes_written: 0 }
    }

    fn flush_if_full(&mut self) -> io::Result<()> {
        if self.buf.len() >= self.capacity {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for WriteBuffer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() >= self.capacity {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
            self.inner.write_all(buf)?;
        } else {
            self.buf.extend_from_slice(buf);
            self.flush_if_full()?;
        }
        self.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{OUTER_CODEC_NONE, OUTER_CODEC_ZSTD};

    #[test]
    fn compress_sections_preserves_order() {
        let a = vec![1u8; 200];
        let b = vec![2u8; 200];
        let jobs = vec![
            SectionJob { stream_id: 10, outer_codec: OUTER_CODEC_NONE, raw_payload: &a },
            SectionJob { stream_id: 20, outer_codec: OUTER_CODEC_ZSTD, raw_payload: &b },
        ];
        let out = compress_sections(&jobs).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].stream_id, 10);
        assert_eq!(out[1].stream_id, 20);
        assert_eq!(out[0].compressed, a);
    }

    #[test]
    fn write_buffer_flushes() {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut wb = WriteBuffer::new(&mut buf, 8);
            wb.write_all(b"hello").unwrap();
            wb.write_all(b" world!").unwrap();
            wb.flush().unwrap();
        }
        assert_eq!(&buf, b"hello world!");
    }

    #[test]
    fn write_buffer_bypasses_for_large_writes() {
        let mut buf: Vec<u8> = Vec::new();
        let mut wb = WriteBuffer::new(&mut buf, 4);
        let big = vec![9u8; 100];
        wb.write_all(&big).unwrap();
        wb.flush().unwrap();
        assert_eq!(buf, big);
    }
}
