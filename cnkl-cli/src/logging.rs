use tracing_subscriber::EnvFilter;

/// Env var holding a `tracing` filter directive, e.g. `CNKL_LOG=cnkl_core=debug`.
pub const LOG_ENV: &str = "CNKL_LOG";

/// Initialize stderr logging. `CNKL_LOG` wins; otherwise `-v` selects debug.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (e.g. in tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .try_init();
}
