use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

const TRACE_FILE_ENV: &str = "PARLEY_TRACE_FILE";
const TRACE_ROTATION_ENV: &str = "PARLEY_TRACE_ROTATION";

/// Held in `main()`; dropping it flushes buffered JSONL lines.
#[allow(missing_debug_implementations)]
pub(crate) struct TracingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Initialize the layered tracing subscriber.
///
/// Layers:
/// 1. Console, always on, filtered by `RUST_LOG` (default `info`)
/// 2. JSONL file, activated by `PARLEY_TRACE_FILE`, filtered at `debug`.
///    `PARLEY_TRACE_ROTATION` picks `daily`, `hourly` or `never` (default).
pub(crate) fn init() -> TracingGuard {
    let mut guards = Vec::new();

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let jsonl_layer = std::env::var(TRACE_FILE_ENV).ok().map(|trace_file| {
        let (dir, filename) = split_trace_path(Path::new(&trace_file));
        let rotation = parse_rotation(std::env::var(TRACE_ROTATION_ENV).ok().as_deref());
        let file_appender = RollingFileAppender::new(rotation, dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);

        let jsonl_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_filter(jsonl_filter)
    });

    Registry::default()
        .with(console_layer)
        .with(jsonl_layer)
        .init();

    TracingGuard { _guards: guards }
}

fn split_trace_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let filename = path.file_name().map_or_else(
        || "parley.jsonl".to_owned(),
        |f| f.to_string_lossy().into_owned(),
    );
    (dir, filename)
}

fn parse_rotation(value: Option<&str>) -> Rotation {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("daily") => Rotation::DAILY,
        Some("hourly") => Rotation::HOURLY,
        _ => Rotation::NEVER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_path_splits_into_dir_and_file() {
        let (dir, file) = split_trace_path(Path::new("/var/log/parley/traces.jsonl"));
        assert_eq!(dir, PathBuf::from("/var/log/parley"));
        assert_eq!(file, "traces.jsonl");
    }

    #[test]
    fn bare_filename_uses_current_dir() {
        let (dir, file) = split_trace_path(Path::new("traces.jsonl"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(file, "traces.jsonl");
    }

    #[test]
    fn rotation_defaults_to_never() {
        assert_eq!(parse_rotation(None), Rotation::NEVER);
        assert_eq!(parse_rotation(Some("weekly")), Rotation::NEVER);
        assert_eq!(parse_rotation(Some("Daily")), Rotation::DAILY);
        assert_eq!(parse_rotation(Some("hourly")), Rotation::HOURLY);
    }
}
