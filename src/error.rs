//! Unified error surface — every sub-component error converts into one of
//! these five kinds at the `pack`/`unpack`/`verify` boundary (§7).

use crate::codec::CodecError;
use crate::crypto::CryptoError;
use crate::format::FormatParseError;
use crate::outer::OuterCodecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("format error: {0}")]
    Format(String),

    #[error("incomplete data: {0}")]
    IncompleteData(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("usage error: {0}")]
    Usage(String),
}

impl EngineError {
    pub fn format<S: Into<String>>(msg: S) -> Self {
        EngineError::Format(msg.into())
    }
    pub fn incomplete<S: Into<String>>(msg: S) -> Self {
        EngineError::IncompleteData(msg.into())
    }
    pub fn integrity<S: Into<String>>(msg: S) -> Self {
        EngineError::Integrity(msg.into())
    }
    pub fn limit<S: Into<String>>(msg: S) -> Self {
        EngineError::LimitExceeded(msg.into())
    }
    pub fn usage<S: Into<String>>(msg: S) -> Self {
        EngineError::Usage(msg.into())
    }
}

impl From<CodecError> for EngineError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Incomplete(_) => EngineError::IncompleteData(e.to_string()),
            CodecError::CountMismatch { .. } => EngineError::IncompleteData(e.to_string()),
            CodecError::UnknownCodecId(_) => EngineError::Format(e.to_string()),
            CodecError::NotIntegerizable => EngineError::Format(e.to_string()),
        }
    }
}

impl From<FormatParseError> for EngineError {
    fn from(e: FormatParseError) -> Self {
        match e {
            FormatParseError::Incomplete { .. } | FormatParseError::MissingEos { .. } => {
                EngineError::IncompleteData(e.to_string())
            }
            FormatParseError::BadMagic { .. }
            | FormatParseError::UnsupportedVersion(_)
            | FormatParseError::UnknownStreamId(_)
            | FormatParseError::UnknownOuterCodec(_)
            | FormatParseError::SchemaError(_) => EngineError::Format(e.to_string()),
            FormatParseError::HashMismatch { .. } | FormatParseError::Crc32Mismatch { .. } => {
                EngineError::Integrity(e.to_string())
            }
        }
    }
}

impl From<CryptoError> for EngineError {
    fn from(e: CryptoError) -> Self {
        EngineError::Integrity(e.to_string())
    }
}

impl From<OuterCodecError> for EngineError {
    fn from(e: OuterCodecError) -> Self {
        match e {
            OuterCodecError::SizeCapExceeded { .. } => EngineError::LimitExceeded(e.to_string()),
            OuterCodecError::CompressFailed(_)
            | OuterCodecError::DecompressFailed(_)
            | OuterCodecError::UnknownCodecId(_) => EngineError::Format(e.to_string()),
        }
    }
}
