use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::digest::{digest_exact, to_hex, Digest, READ_WINDOW};
use crate::error::{ChunklistError, FormatError, Result};
use crate::format::{decode, ChunkRecord, Chunklist};

/// What to do after the first mismatching chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyPolicy {
    /// Stop at the first bad chunk; `failing_chunks` holds just that index.
    #[default]
    FailFast,
    /// Check every chunk and report all bad indices.
    Accumulate,
}

#[derive(Clone, Copy, Debug)]
pub struct VerifyOptions {
    pub policy: VerifyPolicy,
    /// Worker threads; 0 or 1 verifies sequentially.
    pub jobs: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self { policy: VerifyPolicy::FailFast, jobs: 1 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Valid,
    Invalid,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cause {
    LengthMismatch { expected: u64, actual: u64 },
    /// First chunk whose digest differs.
    DigestMismatch { chunk: u64, expected: String, actual: String },
    /// `chunk` is `None` when the target could not be opened at all.
    Io { chunk: Option<u64>, message: String },
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::LengthMismatch { expected, actual } => {
                write!(f, "file is {actual} bytes, chunklist expects {expected}")
            }
            Cause::DigestMismatch { chunk, expected, actual } => {
                write!(f, "chunk {chunk} digest {actual} does not match {expected}")
            }
            Cause::Io { chunk: Some(c), message } => write!(f, "read error in chunk {c}: {message}"),
            Cause::Io { chunk: None, message } => write!(f, "cannot open file: {message}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    status: Status,
    failing_chunks: Vec<u64>,
    cause: Option<Cause>,
}

impl VerificationResult {
    fn valid() -> Self {
        Self { status: Status::Valid, failing_chunks: Vec::new(), cause: None }
    }

    fn io_error(chunk: Option<u64>, err: &io::Error, failing_chunks: Vec<u64>) -> Self {
        Self {
            status: Status::Error,
            failing_chunks,
            cause: Some(Cause::Io { chunk, message: err.to_string() }),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == Status::Valid
    }

    /// Ascending chunk indices; empty unless digests disagreed.
    pub fn failing_chunks(&self) -> &[u64] {
        &self.failing_chunks
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }
}

enum ChunkOutcome {
    Match,
    Mismatch(Digest),
    Io(io::Error),
    /// Not read because an earlier chunk already failed (fail-fast only).
    Skipped,
}

fn check_chunk<R: Read + Seek + ?Sized>(
    reader: &mut R,
    cl: &Chunklist,
    rec: &ChunkRecord,
    buf: &mut [u8],
) -> ChunkOutcome {
    let res = reader
        .seek(SeekFrom::Start(rec.offset))
        .and_then(|_| digest_exact(reader, cl.algorithm(), rec.length as u64, buf));
    match res {
        Ok(d) if d == rec.digest => ChunkOutcome::Match,
        Ok(d) => ChunkOutcome::Mismatch(d),
        Err(e) => ChunkOutcome::Io(e),
    }
}

fn length_mismatch(cl: &Chunklist, actual: u64) -> Option<VerificationResult> {
    if cl.file_length() == actual {
        return None;
    }
    info!(expected = cl.file_length(), actual, "file length mismatch");
    Some(VerificationResult {
        status: Status::Invalid,
        failing_chunks: Vec::new(),
        cause: Some(Cause::LengthMismatch { expected: cl.file_length(), actual }),
    })
}

/// Fold per-chunk outcomes, in ascending index order, into a result.
fn fold_outcomes<I>(cl: &Chunklist, outcomes: I, policy: VerifyPolicy) -> VerificationResult
where
    I: IntoIterator<Item = (usize, ChunkOutcome)>,
{
    let mut failing = Vec::new();
    let mut first_mismatch = None;
    let mut first_io: Option<(u64, io::Error)> = None;
    for (i, outcome) in outcomes {
        let idx = i as u64;
        match outcome {
            ChunkOutcome::Match | ChunkOutcome::Skipped => {}
            ChunkOutcome::Mismatch(actual) => {
                let rec = &cl.chunks()[i];
                info!(chunk = idx, offset = rec.offset, len = rec.length, "chunk digest mismatch");
                failing.push(idx);
                if first_mismatch.is_none() {
                    first_mismatch = Some(Cause::DigestMismatch {
                        chunk: idx,
                        expected: to_hex(&rec.digest),
                        actual: to_hex(&actual),
                    });
                }
                if policy == VerifyPolicy::FailFast {
                    break;
                }
            }
            ChunkOutcome::Io(e) => {
                info!(chunk = idx, error = %e, "read failed during verification");
                if policy == VerifyPolicy::FailFast {
                    return VerificationResult::io_error(Some(idx), &e, failing);
                }
                if first_io.is_none() {
                    first_io = Some((idx, e));
                }
            }
        }
    }
    if let Some((idx, e)) = first_io {
        return VerificationResult::io_error(Some(idx), &e, failing);
    }
    if failing.is_empty() {
        return VerificationResult::valid();
    }
    VerificationResult { status: Status::Invalid, failing_chunks: failing, cause: first_mismatch }
}

/// Sequentially verify a seekable stream of `actual_len` bytes.
pub fn verify_reader<R: Read + Seek>(
    mut reader: R,
    actual_len: u64,
    cl: &Chunklist,
    policy: VerifyPolicy,
) -> VerificationResult {
    if let Some(r) = length_mismatch(cl, actual_len) {
        return r;
    }
    let total = cl.len();
    let mut buf = vec![0u8; READ_WINDOW.min(cl.chunk_size() as usize)];
    let outcomes = cl.chunks().iter().enumerate().map(|(i, rec)| {
        debug!("checking chunk {}/{} (size {})", i, total, rec.length);
        (i, check_chunk(&mut reader, cl, rec, &mut buf))
    });
    fold_outcomes(cl, outcomes, policy)
}

/// Verify chunks on `opts.jobs` workers, each reading through its own handle
/// from `open`. The caller has already checked the target length.
pub fn verify_parallel_with<R, F>(open: F, cl: &Chunklist, opts: &VerifyOptions) -> VerificationResult
where
    R: Read + Seek,
    F: Fn() -> io::Result<R> + Sync + Send,
{
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(opts.jobs.max(1)).build() {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "could not start verify workers; falling back to sequential");
            return match open() {
                Ok(r) => verify_reader(r, cl.file_length(), cl, opts.policy),
                Err(e) => VerificationResult::io_error(None, &e, Vec::new()),
            };
        }
    };
    let fail_fast = opts.policy == VerifyPolicy::FailFast;
    // Lowest failing index seen so far; chunks above it may be skipped in fail-fast mode.
    let lowest_failure = AtomicU64::new(u64::MAX);
    let window = READ_WINDOW.min(cl.chunk_size() as usize);
    let outcomes: Vec<(usize, ChunkOutcome)> = pool.install(|| {
        cl.chunks()
            .par_iter()
            .enumerate()
            .map_init(
                || (open(), vec![0u8; window]),
                |(fh, buf), (i, rec)| {
                    if fail_fast && i as u64 > lowest_failure.load(Ordering::Relaxed) {
                        return (i, ChunkOutcome::Skipped);
                    }
                    let outcome = match fh {
                        Ok(f) => check_chunk(f, cl, rec, buf),
                        Err(e) => ChunkOutcome::Io(io::Error::new(e.kind(), e.to_string())),
                    };
                    if !matches!(outcome, ChunkOutcome::Match) {
                        lowest_failure.fetch_min(i as u64, Ordering::Relaxed);
                    }
                    debug!("checked chunk {}/{} (size {})", i, cl.len(), rec.length);
                    (i, outcome)
                },
            )
            .collect()
    });
    fold_outcomes(cl, outcomes, opts.policy)
}

/// Verify the file at `path` against an already decoded chunklist.
pub fn verify(path: &Path, cl: &Chunklist, opts: &VerifyOptions) -> VerificationResult {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            info!(path = %path.display(), error = %e, "cannot open target");
            return VerificationResult::io_error(None, &e, Vec::new());
        }
    };
    let actual_len = match f.metadata() {
        Ok(m) => m.len(),
        Err(e) => return VerificationResult::io_error(None, &e, Vec::new()),
    };
    if let Some(r) = length_mismatch(cl, actual_len) {
        return r;
    }
    let result = if opts.jobs > 1 && cl.len() > 1 {
        drop(f);
        verify_parallel_with(|| File::open(path), cl, opts)
    } else {
        verify_reader(f, actual_len, cl, opts.policy)
    };
    info!(
        path = %path.display(),
        status = ?result.status(),
        failing = result.failing_chunks().len(),
        chunks = cl.len(),
        "verification finished"
    );
    result
}

/// Decode `encoded` and verify `path` against it. Decode errors pass through unchanged.
pub fn verify_encoded(
    path: &Path,
    encoded: &[u8],
    opts: &VerifyOptions,
) -> std::result::Result<VerificationResult, FormatError> {
    let cl = decode(encoded)?;
    Ok(verify(path, &cl, opts))
}

/// Read and decode a chunklist file.
pub fn load_chunklist(path: &Path) -> Result<Chunklist> {
    let bytes = std::fs::read(path).map_err(|e| ChunklistError::io_at("read", path, e))?;
    let cl = decode(&bytes)?;
    debug!(
        path = %path.display(),
        chunks = cl.len(),
        chunk_size = cl.chunk_size(),
        algorithm = cl.algorithm().name(),
        "loaded chunklist"
    );
    Ok(cl)
}
