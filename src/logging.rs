//! Tracing setup for the pipeline process.
//!
//! Stdout carries a compact, target-free stream meant for operators watching a `serve` or `run`
//! session. A second copy goes to disk with targets kept, since partition workers interleave and
//! the module path is often the quickest way to tell the collector's lines from the indexer's.
//!
//! The file is chosen by [`LogTarget::from_env`]: `NEWSDIGEST_LOG_FILE` appends to one fixed file,
//! otherwise a daily rolling file is kept under `NEWSDIGEST_LOG_DIR` (default `logs/`).
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Filter used when `RUST_LOG` is unset. Pool and HTTP internals are noisy at `info`.
const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn,reqwest=warn,html5ever=error";

const LOG_FILE_PREFIX: &str = "newsdigest.log";

/// Where the file copy of the logs is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Append to one file.
    File(PathBuf),
    /// Rotate daily inside a directory.
    DailyIn(PathBuf),
}

impl LogTarget {
    /// Resolve from `NEWSDIGEST_LOG_FILE` and `NEWSDIGEST_LOG_DIR`.
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var("NEWSDIGEST_LOG_FILE").ok(),
            std::env::var("NEWSDIGEST_LOG_DIR").ok(),
        )
    }

    fn resolve(file: Option<String>, dir: Option<String>) -> Self {
        let non_blank = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        match (non_blank(file), non_blank(dir)) {
            (Some(file), _) => Self::File(PathBuf::from(file)),
            (None, Some(dir)) => Self::DailyIn(PathBuf::from(dir)),
            (None, None) => Self::DailyIn(PathBuf::from("logs")),
        }
    }
}

/// Install the stdout and file subscribers. Call once, before the first span is entered.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match file_writer(&LogTarget::from_env()) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// `None` when the target cannot be opened; stdout logging still works in that case.
fn file_writer(target: &LogTarget) -> Option<NonBlocking> {
    let (writer, guard) = match target {
        LogTarget::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| eprintln!("Failed to open log file {}: {err}", path.display()))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        LogTarget::DailyIn(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|err| eprintln!("Failed to create log directory {}: {err}", dir.display()))
                .ok()?;
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}
