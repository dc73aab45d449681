use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cnkl_core::builder::{default_chunklist_path, generate_to, BuildOptions};
use cnkl_core::verify::{load_chunklist, verify};
use cnkl_core::{ChunklistError, DigestAlgorithm, FormatError, Status, VerifyOptions, VerifyPolicy};

mod logging;

mod exit {
    pub const OK: u8 = 0;
    pub const VERIFY_FAILED: u8 = 1;
    pub const IO: u8 = 2;
    pub const NOT_CHUNKLIST: u8 = 3;
    pub const UNSUPPORTED: u8 = 4;
    pub const NOT_FOUND: u8 = 5;
    pub const USAGE: u8 = 64;
}

/// Extensions tried, in order, when no chunklist is named on the command line.
const CHUNKLIST_EXTS: [&str; 2] = ["chunklist", "integrityDataV1"];

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DigestArg {
    Sha256,
    Blake3,
}

impl From<DigestArg> for DigestAlgorithm {
    fn from(d: DigestArg) -> Self {
        match d {
            DigestArg::Sha256 => DigestAlgorithm::Sha256,
            DigestArg::Blake3 => DigestAlgorithm::Blake3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "cnkl", version, about = "Generate and check chunklist files")]
#[command(group(ArgGroup::new("mode").args(["check", "generate"])))]
struct Cli {
    /// Log every chunk as it is processed
    #[arg(short, long)]
    verbose: bool,
    /// Check <FILE> against its chunklist (default)
    #[arg(short = 'c', long)]
    check: bool,
    /// Generate a chunklist for <FILE>
    #[arg(short = 'g', long)]
    generate: bool,
    /// Chunklist path [default: <FILE>.chunklist]
    #[arg(short = 'l', long = "chunklist", value_name = "CHUNKLIST")]
    chunklist: Option<PathBuf>,
    /// Chunk size for generation, e.g. 4096, 512K, 10M
    #[arg(long, env = "CNKL_CHUNK_SIZE", default_value = "10M", value_parser = parse_size)]
    chunk_size: u64,
    /// Digest algorithm for generation
    #[arg(long, value_enum, default_value_t = DigestArg::Sha256)]
    digest: DigestArg,
    /// Check every chunk instead of stopping at the first bad one
    #[arg(long)]
    accumulate: bool,
    /// Worker threads for checking
    #[arg(long, env = "CNKL_JOBS", default_value_t = 1)]
    jobs: usize,
    /// Print the verification result as JSON on stdout
    #[arg(long)]
    json: bool,
    /// Print the decoded chunklist as JSON on stdout and exit
    #[arg(long, conflicts_with = "generate")]
    dump: bool,
    file: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { exit::USAGE } else { exit::OK };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };
    logging::init_logging(cli.verbose);
    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ChunklistError>() {
            return match e {
                ChunklistError::Io { .. } => exit::IO,
                ChunklistError::Format(f) => format_exit_code(f),
                ChunklistError::InvalidChunkSize { .. } => exit::USAGE,
            };
        }
        if let Some(f) = cause.downcast_ref::<FormatError>() {
            return format_exit_code(f);
        }
    }
    exit::IO
}

fn format_exit_code(f: &FormatError) -> u8 {
    if f.is_unsupported() {
        exit::UNSUPPORTED
    } else {
        exit::NOT_CHUNKLIST
    }
}

fn run(cli: &Cli) -> Result<u8> {
    if cli.generate {
        return generate(cli);
    }
    let chunklist = match &cli.chunklist {
        Some(p) => p.clone(),
        None => match discover_chunklist(&cli.file) {
            Some(p) => p,
            None => {
                eprintln!("Error: failure to find matching chunklist file");
                return Ok(exit::NOT_FOUND);
            }
        },
    };
    if cli.dump {
        return dump(&chunklist);
    }
    check(cli, &chunklist)
}

fn generate(cli: &Cli) -> Result<u8> {
    let dest = cli.chunklist.clone().unwrap_or_else(|| default_chunklist_path(&cli.file));
    let opts = BuildOptions { chunk_size: cli.chunk_size, algorithm: cli.digest.into() };
    generate_to(&cli.file, &dest, &opts)
        .with_context(|| format!("generate chunklist for {}", cli.file.display()))?;
    eprintln!("generated at: {}", dest.display());
    Ok(exit::OK)
}

fn check(cli: &Cli, chunklist: &Path) -> Result<u8> {
    let cl = load_chunklist(chunklist)
        .with_context(|| format!("{} is not a usable chunklist", chunklist.display()))?;
    let policy = if cli.accumulate { VerifyPolicy::Accumulate } else { VerifyPolicy::FailFast };
    let result = verify(&cli.file, &cl, &VerifyOptions { policy, jobs: cli.jobs });
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result).context("serialize result")?);
    }
    let code = match result.status() {
        Status::Valid => {
            eprintln!("verify succeeded.");
            exit::OK
        }
        Status::Invalid => {
            if let Some(cause) = result.cause() {
                eprintln!("{cause}");
            }
            if !result.failing_chunks().is_empty() {
                eprintln!("bad chunks: {:?}", result.failing_chunks());
            }
            eprintln!("verify failed.");
            exit::VERIFY_FAILED
        }
        Status::Error => {
            match result.cause() {
                Some(cause) => eprintln!("Error: {}: {cause}", cli.file.display()),
                None => eprintln!("Error: {} could not be read.", cli.file.display()),
            }
            exit::IO
        }
    };
    Ok(code)
}

fn dump(chunklist: &Path) -> Result<u8> {
    let cl = load_chunklist(chunklist)
        .with_context(|| format!("{} is not a usable chunklist", chunklist.display()))?;
    println!("{}", serde_json::to_string_pretty(&cl).context("serialize chunklist")?);
    Ok(exit::OK)
}

fn discover_chunklist(file: &Path) -> Option<PathBuf> {
    CHUNKLIST_EXTS.iter().find_map(|ext| {
        let mut s = file.as_os_str().to_owned();
        s.push(".");
        s.push(ext);
        let candidate = PathBuf::from(s);
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "found chunklist");
            Some(candidate)
        } else {
            None
        }
    })
}

/// Parse `N`, `NK`, `NM`, `NG` (binary multiples; `KiB`/`KB` spellings accepted).
fn parse_size(spec: &str) -> Result<u64, String> {
    let s = spec.trim().to_uppercase();
    let s = s.strip_suffix("IB").or_else(|| s.strip_suffix('B')).unwrap_or(&s);
    let (num, mul) = if let Some(n) = s.strip_suffix('K') {
        (n, 1u64 << 10)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1 << 20)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1 << 30)
    } else {
        (s, 1)
    };
    let v: u64 = num.trim().parse().map_err(|_| format!("bad size {spec}"))?;
    v.checked_mul(mul).ok_or_else(|| format!("size {spec} is too large"))
}
