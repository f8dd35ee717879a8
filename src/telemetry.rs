//! Shared `tracing` setup for every binary: stdout plus a non-blocking
//! rolling file appender, the pairing `tracing-appender`'s own docs show and
//! the teacher's `Cargo.toml` already depends on without wiring up.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Initializes `tracing` with an env-filter (`RUST_LOG`, falling back to
/// `log_level`) writing to stdout and to `<log_dir>/<prefix>.log`, rolled
/// daily. The returned guard must be held for the process lifetime — once it
/// drops, buffered log lines stop flushing.
pub fn init(prefix: &str, log_dir: &std::path::Path, log_level: &str) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let file_appender = tracing_appender::rolling::daily(log_dir, format!("{prefix}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.and(std::io::stdout))
        .init();

    guard
}
