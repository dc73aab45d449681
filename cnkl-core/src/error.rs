use std::io;
use std::path::Path;
use thiserror::Error;

/// Malformed or unsupported chunklist byte stream. Never repaired.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("not a chunklist (magic {found:#010x})")]
    BadMagic { found: u32 },
    #[error("unsupported chunklist version {version} (newest supported is {supported})")]
    UnsupportedVersion { version: u8, supported: u8 },
    #[error("truncated chunklist: need {needed} bytes, have {available}")]
    Truncated { needed: u64, available: u64 },
    #[error("unknown digest algorithm id {0}")]
    AlgorithmUnknown(u8),
    #[error("unsupported chunk method {0}")]
    UnsupportedChunkMethod(u8),
    #[error("bad chunklist header: {0}")]
    BadHeader(String),
    #[error("inconsistent chunklist: {0}")]
    Inconsistent(String),
}

impl FormatError {
    /// True when the stream is well-formed but uses something this build can't read.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            FormatError::UnsupportedVersion { .. }
                | FormatError::AlgorithmUnknown(_)
                | FormatError::UnsupportedChunkMethod(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ChunklistError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("chunk size must be between 1 and {max} bytes, got {got}")]
    InvalidChunkSize { got: u64, max: u64 },
}

impl ChunklistError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        ChunklistError::Io { context: context.into(), source }
    }

    pub(crate) fn io_at(op: &str, path: &Path, source: io::Error) -> Self {
        Self::io(format!("{op} {}", path.display()), source)
    }
}

pub type Result<T, E = ChunklistError> = std::result::Result<T, E>;
