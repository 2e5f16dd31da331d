use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, info, metadata::LevelFilter, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

fn do_init(console_level: Level, file_level: Option<(Level, PathBuf)>) {
    let mut message = String::from("Logging with: stderr");

    // RUST_LOG wins if set.
    let console_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(console_level).into())
        .from_env_lossy();

    // Stdout is for program output.
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let registry = tracing_subscriber::registry().with(console_layer);

    let maybe_file_layer = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, "repl.log");

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        Some(file_layer)
    } else {
        None
    };

    // Tests may have set up something already.
    if registry.with(maybe_file_layer).try_init().is_err() {
        message += " (not installed, a subscriber was already set)";
    }

    debug!(message);
}

/// Initialize tracing, on stderr and optionally to daily rotated files in a directory.
///
/// Will only initialize once, so tests may call this.
pub async fn init(console_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // To avoid race condition between the `.read()` and the
        // `.write()`.
        if *initialized {
            return;
        }

        do_init(console_level, file_logging);

        *initialized = true;
    }

    info!("Logging initialized");
}
