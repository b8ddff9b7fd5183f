//! Tracing setup: stderr by default, an append-only log file when
//! `PERFDECK_LOG` points at one.

use std::io::IsTerminal;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Keeps the background log writer alive for the process lifetime.
#[derive(Debug)]
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

pub fn init_tracing(default_level: &str) -> TelemetryGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = std::env::var("PERFDECK_LOG").ok().map(PathBuf::from);
    let (writer, guard) = match log_file {
        Some(path) => {
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(file) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(file);
                    (BoxMakeWriter::new(non_blocking), Some(guard))
                }
                Err(err) => {
                    eprintln!("Warning: cannot log to {}: {err}", path.display());
                    (BoxMakeWriter::new(std::io::stderr), None)
                }
            }
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(writer);

    if subscriber.try_init().is_err() {
        // a second init (e.g. in tests) keeps the first subscriber
        return TelemetryGuard { _guard: None };
    }
    TelemetryGuard { _guard: guard }
}
