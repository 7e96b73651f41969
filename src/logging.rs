use anyhow::{Context, Result};
use tracing_subscriber::FmtSubscriber;

/// Initialize the logging system
pub fn init_logging(level: tracing::Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_names(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Setting default subscriber failed")
}
