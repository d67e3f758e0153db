//! Tracing subscriber setup for the binary.

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_PREFIX: &str = "interna-review.log";

/// Build the env filter: `RUST_LOG` wins, otherwise `info` (or `debug` when
/// verbose).
pub fn build_filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "interna_review=debug,tower_http=debug,info"
    } else {
        "info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Daily-rolling file writer under `dir`. Lines are flushed when the guard
/// drops.
pub fn file_writer(dir: &Path) -> (NonBlocking, WorkerGuard) {
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    tracing_appender::non_blocking(appender)
}

/// Install the global subscriber.
///
/// Console output is human-readable unless `json` is set. When `log_dir` is
/// given, a daily-rolling JSON file is written as well; the returned guard
/// must be held until exit or buffered lines are lost.
pub fn init_logging(verbose: bool, json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = build_filter(verbose);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = file_writer(dir);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (console_json, console_text) = if json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().with_target(false).with_writer(std::io::stderr)))
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init();

    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_verbose_mentions_crate() {
        // Only meaningful when RUST_LOG is unset, which is the case under cargo test
        // unless the caller exported it.
        if std::env::var("RUST_LOG").is_err() {
            let filter = build_filter(true).to_string();
            assert!(filter.contains("interna_review=debug"));
            assert!(!build_filter(false).to_string().contains("debug"));
        }
    }

    #[test]
    fn test_file_writer_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, guard) = file_writer(dir.path());
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().json().with_ansi(false).with_writer(writer));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(job_id = "job-1", "hello from test");
        });
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(LOG_FILE_PREFIX));

        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert!(content.contains("hello from test"));
        assert!(content.contains("job-1"));
    }
}
