use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::io::{self, Read};

/// Width of every digest this crate produces.
pub const DIGEST_LEN: usize = 32;

/// Read window used when feeding a hasher; bounds memory independent of chunk size.
pub const READ_WINDOW: usize = 256 * 1024;

pub type Digest = [u8; DIGEST_LEN];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    /// Identifier stored in the chunklist header.
    pub fn id(self) -> u8 {
        match self {
            DigestAlgorithm::Sha256 => 1,
            DigestAlgorithm::Blake3 => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(DigestAlgorithm::Sha256),
            2 => Some(DigestAlgorithm::Blake3),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }
}

/// Incremental hasher: `new -> update* -> finalize`.
pub enum ChunkHasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl ChunkHasher {
    pub fn new(alg: DigestAlgorithm) -> Self {
        match alg {
            DigestAlgorithm::Sha256 => ChunkHasher::Sha256(Sha256::new()),
            DigestAlgorithm::Blake3 => ChunkHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChunkHasher::Sha256(h) => h.update(data),
            ChunkHasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Digest {
        match self {
            ChunkHasher::Sha256(h) => h.finalize().into(),
            ChunkHasher::Blake3(h) => *h.finalize().as_bytes(),
        }
    }
}

/// One-shot digest of an in-memory buffer.
pub fn digest_bytes(alg: DigestAlgorithm, data: &[u8]) -> Digest {
    let mut h = ChunkHasher::new(alg);
    h.update(data);
    h.finalize()
}

/// Feed up to `max` bytes from `reader` into a fresh hasher, `buf` at a time.
/// Stops early only at end of stream; returns the digest and the byte count.
pub fn digest_upto<R: Read + ?Sized>(
    reader: &mut R,
    alg: DigestAlgorithm,
    max: u64,
    buf: &mut [u8],
) -> io::Result<(Digest, u64)> {
    let mut h = ChunkHasher::new(alg);
    let mut done = 0u64;
    while done < max {
        let want = (max - done).min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        h.update(&buf[..n]);
        done += n as u64;
    }
    Ok((h.finalize(), done))
}

/// Like [`digest_upto`] but the stream must hold all `len` bytes.
pub fn digest_exact<R: Read + ?Sized>(
    reader: &mut R,
    alg: DigestAlgorithm,
    len: u64,
    buf: &mut [u8],
) -> io::Result<Digest> {
    let (d, n) = digest_upto(reader, alg, len, buf)?;
    if n < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended {} bytes before end of chunk", len - n),
        ));
    }
    Ok(d)
}

pub fn to_hex(d: &Digest) -> String {
    hex::encode(d)
}
