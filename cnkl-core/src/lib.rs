//! Chunklist generation and verification.
//!
//! A chunklist records a digest for every fixed-size chunk of a file so the
//! file can later be checked without a trusted copy of its contents.

pub mod builder;
pub mod digest;
pub mod error;
pub mod format;
pub mod verify;

pub use builder::{default_chunklist_path, generate, BuildOptions, ChunkBuilder};
pub use digest::DigestAlgorithm;
pub use error::{ChunklistError, FormatError};
pub use format::{decode, ChunkRecord, Chunklist, DEFAULT_CHUNK_SIZE};
pub use verify::{verify, Cause, Status, VerificationResult, VerifyOptions, VerifyPolicy};
