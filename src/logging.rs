//! Logging configuration for snowlink.
//!
//! Logs go to stderr so query output on stdout stays pipeable.

use std::future::Future;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initializes stderr logging.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies.
pub fn init_stderr_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Awaits `fut` and logs how long it took under `operation`.
pub async fn timed<F, T>(operation: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let output = fut.await;
    info!(
        operation,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "{operation} finished in {:.3}s",
        start.elapsed().as_secs_f64()
    );
    output
}
