use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::digest::{digest_upto, DigestAlgorithm, READ_WINDOW};
use crate::error::{ChunklistError, Result};
use crate::format::{ChunkRecord, Chunklist, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// Extension appended to the target path for the default chunklist location.
pub const CHUNKLIST_EXT: &str = "chunklist";

#[derive(Clone, Copy, Debug)]
pub struct BuildOptions {
    pub chunk_size: u64,
    pub algorithm: DigestAlgorithm,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, algorithm: DigestAlgorithm::Sha256 }
    }
}

impl BuildOptions {
    fn check(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ChunklistError::InvalidChunkSize {
                got: self.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }
        Ok(())
    }
}

pub struct ChunkBuilder;

impl ChunkBuilder {
    /// Chunk and digest a stream front to back. The trailing partial chunk is
    /// kept with its real length.
    pub fn build_from_reader<R: Read>(mut reader: R, opts: &BuildOptions) -> Result<Chunklist> {
        opts.check()?;
        let mut buf = vec![0u8; READ_WINDOW.min(opts.chunk_size as usize)];
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        loop {
            let (digest, n) = digest_upto(&mut reader, opts.algorithm, opts.chunk_size, &mut buf)
                .map_err(|e| ChunklistError::io(format!("read at offset {offset}"), e))?;
            if n == 0 {
                break;
            }
            debug!(chunk = chunks.len(), offset, len = n, "hashed chunk");
            // n <= chunk_size <= u32::MAX
            chunks.push(ChunkRecord { offset, length: n as u32, digest });
            offset += n;
            if n < opts.chunk_size {
                break;
            }
        }
        let cl = Chunklist::new(opts.chunk_size, opts.algorithm, chunks)?;
        debug_assert_eq!(cl.file_length(), offset);
        Ok(cl)
    }

    pub fn build(path: &Path, opts: &BuildOptions) -> Result<Chunklist> {
        opts.check()?;
        let f = File::open(path).map_err(|e| ChunklistError::io_at("open", path, e))?;
        let size_before = f.metadata().map_err(|e| ChunklistError::io_at("stat", path, e))?.len();
        let cl = Self::build_from_reader(&f, opts).map_err(|e| match e {
            ChunklistError::Io { context, source } => {
                ChunklistError::Io { context: format!("{}: {context}", path.display()), source }
            }
            other => other,
        })?;
        if cl.file_length() != size_before {
            warn!(
                path = %path.display(),
                expected = size_before,
                read = cl.file_length(),
                "file size changed while generating chunklist"
            );
        }
        info!(
            path = %path.display(),
            chunks = cl.len(),
            bytes = cl.file_length(),
            algorithm = cl.algorithm().name(),
            "built chunklist"
        );
        Ok(cl)
    }
}

/// Build the chunklist for `path` and return its encoded bytes.
pub fn generate(path: &Path, opts: &BuildOptions) -> Result<Vec<u8>> {
    Ok(ChunkBuilder::build(path, opts)?.encode())
}

/// `<path>.chunklist`
pub fn default_chunklist_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(CHUNKLIST_EXT);
    PathBuf::from(s)
}

/// Write `cl` to `dest` through a temp file in the same directory, then
/// rename it into place. `dest` is never left partially written.
pub fn write_chunklist(dest: &Path, cl: &Chunklist) -> Result<()> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".cnkl-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| ChunklistError::io_at("create temp file in", dir, e))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        w.write_all(&cl.encode())
            .and_then(|_| w.flush())
            .map_err(|e| ChunklistError::io_at("write", tmp.path(), e))?;
    }
    tmp.as_file().sync_all().map_err(|e| ChunklistError::io_at("sync", tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| ChunklistError::io_at("rename into", dest, e.error))?;
    debug!(dest = %dest.display(), "chunklist written");
    Ok(())
}

/// Generate the chunklist for `path` and store it at `dest`.
pub fn generate_to(path: &Path, dest: &Path, opts: &BuildOptions) -> Result<Chunklist> {
    let cl = ChunkBuilder::build(path, opts)?;
    write_chunklist(dest, &cl)?;
    Ok(cl)
}
