//! Chunklist binary layout.
//!
//! All integers are little-endian. The header starts with the `CNKL` magic
//! and a header size, so readers can skip fields they don't know about.
//!
//! Version 2 (written by this crate, 52 bytes):
//! magic u32 | header_size u32 | version u8 | chunk_method u8 | sig_method u8 |
//! digest_alg u8 | chunk_count u64 | chunk_offset u64 | sig_offset u64 |
//! chunk_size u64 | file_length u64
//!
//! Version 1 (legacy, read only) is the same header cut after `sig_offset`
//! (36 bytes), with byte 11 unused and SHA-256 implied.
//!
//! Chunk records follow at `chunk_offset`: `u32 length + digest` for the
//! explicit method, bare digests for the uniform method (lengths derived
//! from `chunk_size` and `file_length`).

use crate::digest::{to_hex, Digest, DigestAlgorithm, DIGEST_LEN};
use crate::error::FormatError;
use serde::{Serialize, Serializer};

pub const MAGIC: u32 = 0x4C4B_4E43; // "CNKL"
pub const VERSION_LEGACY: u8 = 1;
pub const VERSION_CURRENT: u8 = 2;
pub const HEADER_LEN_V1: usize = 36;
pub const HEADER_LEN_V2: usize = 52;

pub const METHOD_EXPLICIT: u8 = 1;
pub const METHOD_UNIFORM: u8 = 2;

const SIG_NONE: u8 = 0;

pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
/// Explicit records store the length as u32.
pub const MAX_CHUNK_SIZE: u64 = u32::MAX as u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub offset: u64,
    pub length: u32,
    #[serde(serialize_with = "serialize_digest")]
    pub digest: Digest,
}

impl ChunkRecord {
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Validated manifest of per-chunk digests for one file.
///
/// Records are contiguous from offset 0, non-empty, never longer than
/// `chunk_size`, and their lengths sum to `file_length`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Chunklist {
    chunk_size: u64,
    algorithm: DigestAlgorithm,
    file_length: u64,
    chunks: Vec<ChunkRecord>,
}

impl Chunklist {
    pub fn new(
        chunk_size: u64,
        algorithm: DigestAlgorithm,
        chunks: Vec<ChunkRecord>,
    ) -> Result<Self, FormatError> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(FormatError::Inconsistent(format!("chunk size {chunk_size} out of range")));
        }
        let mut next = 0u64;
        for (i, ch) in chunks.iter().enumerate() {
            if ch.offset != next {
                return Err(FormatError::Inconsistent(format!(
                    "chunk {i} starts at {} but previous chunk ends at {next}",
                    ch.offset
                )));
            }
            if ch.length == 0 {
                return Err(FormatError::Inconsistent(format!("chunk {i} is empty")));
            }
            if ch.length as u64 > chunk_size {
                return Err(FormatError::Inconsistent(format!(
                    "chunk {i} has {} bytes, more than chunk size {chunk_size}",
                    ch.length
                )));
            }
            next = ch.end();
        }
        Ok(Self { chunk_size, algorithm, file_length: next, chunks })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Every record is `chunk_size` long except possibly the last.
    pub fn is_uniform(&self) -> bool {
        match self.chunks.split_last() {
            None => true,
            Some((_, head)) => head.iter().all(|c| c.length as u64 == self.chunk_size),
        }
    }

    /// Serialize as the current format version. Deterministic.
    pub fn encode(&self) -> Vec<u8> {
        let uniform = self.is_uniform();
        let method = if uniform { METHOD_UNIFORM } else { METHOD_EXPLICIT };
        let mut out = Vec::with_capacity(HEADER_LEN_V2 + self.chunks.len() * record_len(method));
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&(HEADER_LEN_V2 as u32).to_le_bytes());
        out.push(VERSION_CURRENT);
        out.push(method);
        out.push(SIG_NONE);
        out.push(self.algorithm.id());
        out.extend_from_slice(&(self.chunks.len() as u64).to_le_bytes());
        out.extend_from_slice(&(HEADER_LEN_V2 as u64).to_le_bytes()); // chunk_offset
        out.extend_from_slice(&0u64.to_le_bytes()); // sig_offset
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        out.extend_from_slice(&self.file_length.to_le_bytes());
        debug_assert_eq!(out.len(), HEADER_LEN_V2);
        for ch in &self.chunks {
            if !uniform {
                out.extend_from_slice(&ch.length.to_le_bytes());
            }
            out.extend_from_slice(&ch.digest);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        decode(bytes)
    }
}

fn record_len(method: u8) -> usize {
    if method == METHOD_UNIFORM {
        DIGEST_LEN
    } else {
        4 + DIGEST_LEN
    }
}

fn need(bytes: &[u8], n: u64) -> Result<(), FormatError> {
    let available = bytes.len() as u64;
    if available < n {
        return Err(FormatError::Truncated { needed: n, available });
    }
    Ok(())
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    let mut x = [0u8; 4];
    x.copy_from_slice(&b[at..at + 4]);
    u32::from_le_bytes(x)
}

fn le_u64(b: &[u8], at: usize) -> u64 {
    let mut x = [0u8; 8];
    x.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(x)
}

/// Parse a chunklist of any supported version.
pub fn decode(bytes: &[u8]) -> Result<Chunklist, FormatError> {
    need(bytes, 4)?;
    let magic = le_u32(bytes, 0);
    if magic != MAGIC {
        return Err(FormatError::BadMagic { found: magic });
    }
    need(bytes, 12)?;
    let version = bytes[8];
    let fixed_len = match version {
        VERSION_LEGACY => HEADER_LEN_V1,
        VERSION_CURRENT => HEADER_LEN_V2,
        v => return Err(FormatError::UnsupportedVersion { version: v, supported: VERSION_CURRENT }),
    };
    need(bytes, fixed_len as u64)?;
    let header_size = le_u32(bytes, 4) as u64;
    if header_size < fixed_len as u64 {
        return Err(FormatError::BadHeader(format!(
            "header size {header_size} below {fixed_len} for version {version}"
        )));
    }
    need(bytes, header_size)?;

    let method = bytes[9];
    let alg_id = bytes[11];
    let algorithm = if version == VERSION_LEGACY {
        // byte 11 was padding in v1
        match alg_id {
            0 | 1 => DigestAlgorithm::Sha256,
            id => return Err(FormatError::AlgorithmUnknown(id)),
        }
    } else {
        DigestAlgorithm::from_id(alg_id).ok_or(FormatError::AlgorithmUnknown(alg_id))?
    };
    match (version, method) {
        (_, METHOD_EXPLICIT) | (VERSION_CURRENT, METHOD_UNIFORM) => {}
        (_, m) => return Err(FormatError::UnsupportedChunkMethod(m)),
    }

    let count = le_u64(bytes, 12);
    let chunk_offset = le_u64(bytes, 20);
    if chunk_offset < header_size {
        return Err(FormatError::BadHeader(format!(
            "chunk array offset {chunk_offset} inside {header_size}-byte header"
        )));
    }
    let rec_len = record_len(method);
    let array_end = count
        .checked_mul(rec_len as u64)
        .and_then(|n| n.checked_add(chunk_offset))
        .ok_or(FormatError::Truncated { needed: u64::MAX, available: bytes.len() as u64 })?;
    need(bytes, array_end)?;
    let array = &bytes[chunk_offset as usize..array_end as usize];

    if version == VERSION_LEGACY {
        let chunks = explicit_records(array);
        let chunk_size = chunks.iter().map(|c| c.length as u64).max().unwrap_or(DEFAULT_CHUNK_SIZE);
        return Chunklist::new(chunk_size, algorithm, chunks);
    }

    let chunk_size = le_u64(bytes, 36);
    let file_length = le_u64(bytes, 44);
    let chunks = if method == METHOD_UNIFORM {
        uniform_records(array, chunk_size, file_length)?
    } else {
        explicit_records(array)
    };
    let cl = Chunklist::new(chunk_size, algorithm, chunks)?;
    if cl.file_length != file_length {
        return Err(FormatError::Inconsistent(format!(
            "records cover {} bytes but header declares {file_length}",
            cl.file_length
        )));
    }
    Ok(cl)
}

fn explicit_records(array: &[u8]) -> Vec<ChunkRecord> {
    let mut out = Vec::with_capacity(array.len() / record_len(METHOD_EXPLICIT));
    let mut offset = 0u64;
    for rec in array.chunks_exact(record_len(METHOD_EXPLICIT)) {
        let length = le_u32(rec, 0);
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&rec[4..]);
        out.push(ChunkRecord { offset, length, digest });
        offset += length as u64;
    }
    out
}

fn uniform_records(
    array: &[u8],
    chunk_size: u64,
    file_length: u64,
) -> Result<Vec<ChunkRecord>, FormatError> {
    let count = (array.len() / DIGEST_LEN) as u64;
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(FormatError::Inconsistent(format!("chunk size {chunk_size} out of range")));
    }
    let expected = file_length.div_ceil(chunk_size);
    if count != expected {
        return Err(FormatError::Inconsistent(format!(
            "{count} uniform chunks cannot cover {file_length} bytes at chunk size {chunk_size}"
        )));
    }
    let mut out = Vec::with_capacity(count as usize);
    for (i, rec) in array.chunks_exact(DIGEST_LEN).enumerate() {
        let offset = i as u64 * chunk_size;
        let length = (file_length - offset).min(chunk_size) as u32;
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(rec);
        out.push(ChunkRecord { offset, length, digest });
    }
    Ok(out)
}

fn serialize_digest<S: Serializer>(d: &Digest, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&to_hex(d))
}
