//! # gics — deterministic, fail-closed time-series compression engine
//!
//! Format guarantees (frozen at FORMAT_VERSION=3):
//! - All numeric fields are little-endian; never negotiated
//! - Every segment and stream section is self-describing and independently
//!   hashed; corrupt framing aborts decode rather than guessing
//! - Inner codecs are a closed tagged variant — no plugin ABI, no runtime
//!   codec registration (§9 "Polymorphism across inner codecs")
//! - The EOS trailer is the final authority: any file whose last 37 bytes
//!   don't validate is rejected outright, independent of segment count
//! - `pack`/`unpack`/`verify` are the only core operations; everything else
//!   (CLI, recovery scan) is an external collaborator built on top of them

pub mod bitio;
pub mod chm;
pub mod codec;
pub mod context;
pub mod crypto;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod field_math;
pub mod format;
pub mod metrics;
pub mod model;
pub mod outer;
pub mod perf;
pub mod recovery;

// Flat re-exports for the most common types.
pub use chm::{ChmContinuity, ChmReport, ChmStats, Route};
pub use decoder::{unpack, verify, Decoder, IntegrityMode, UnpackOptions};
pub use encoder::{
    pack, pack_with_telemetry, BlockAnnotation, Encoder, PackOptions, StreamState, StreamTelemetry, Telemetry,
};
pub use error::EngineError;
pub use model::{CodecHint, FieldRecord, FieldType, ItemId, ItemIdKind, SchemaField, SchemaProfile, Snapshot};
pub use recovery::{scan_file, BlockHealth, RecoveryQuality, RecoveryReport};
