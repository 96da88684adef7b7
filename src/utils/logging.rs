//! Logging setup
//!
//! `tracing` output goes to stderr so stdout stays reserved for transcripts
//! and JSON. An optional daily rolling file gets the same events as JSON
//! lines.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log file name prefix inside the log directory
pub const LOG_FILE_PREFIX: &str = "termrunner.log";

/// Filter directive for the verbosity flags.
///
/// `None` means no flag was given and `RUST_LOG` (or `warn`) applies.
pub fn level_directive(verbose: bool, quiet: bool) -> Option<&'static str> {
    if quiet {
        Some("error")
    } else if verbose {
        Some("debug")
    } else {
        None
    }
}

fn build_filter(verbose: bool, quiet: bool) -> EnvFilter {
    match level_directive(verbose, quiet) {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit, it flushes the file writer.
pub fn init(
    verbose: bool,
    quiet: bool,
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(build_filter(verbose, quiet));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(build_filter(verbose, quiet));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive(false, false), None);
        assert_eq!(level_directive(true, false), Some("debug"));
        assert_eq!(level_directive(false, true), Some("error"));
        assert_eq!(level_directive(true, true), Some("error"));
    }

    #[test]
    fn test_file_log_written() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        let guard = init(true, false, Some(&logs)).unwrap();
        tracing::debug!("hello from the log test");
        drop(guard);

        let entries: Vec<_> = std::fs::read_dir(&logs).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().to_string_lossy().into_owned();
        assert!(name.starts_with(LOG_FILE_PREFIX));
        let text = std::fs::read_to_string(entries[0].path()).unwrap();
        assert!(text.contains("hello from the log test"));
    }
}
