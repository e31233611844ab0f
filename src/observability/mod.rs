//! Observability.
//!
//! Diagnostics go through `tracing`. [`init`] installs the process-wide
//! subscriber once. Counters are emitted through the `metrics` facade and
//! stay no-ops until a recorder is installed by the embedding application.

mod logging;

pub use logging::{LogFormat, LoggingConfig};

use crate::config::RulewrightConfig;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes logging from loaded configuration.
///
/// # Errors
///
/// Returns an error if logging was already initialized or the log file
/// cannot be opened.
pub fn init_from_config(config: &RulewrightConfig, verbose: bool) -> Result<()> {
    init(LoggingConfig::from_settings(Some(&config.logging), verbose))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if logging was already initialized or the log file
/// cannot be opened.
pub fn init(config: LoggingConfig) -> Result<()> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::operation("install_subscriber", "logging is already set up for this process"));
    }

    let (writer, ansi) = match &config.file {
        Some(path) => (BoxMakeWriter::new(open_log(path)?), false),
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .with(config.filter)
            .try_init()
            .map_err(subscriber_error)?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(true),
            )
            .with(config.filter)
            .try_init()
            .map_err(subscriber_error)?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(false),
            )
            .with(config.filter)
            .try_init()
            .map_err(subscriber_error)?,
    }

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::operation("install_subscriber", "logging was set up concurrently"))
}

/// Log sink shared by every `tracing` writer handle; events are appended to one file.
#[derive(Clone)]
struct SharedLog {
    file: Arc<Mutex<File>>,
}

impl SharedLog {
    fn locked<T>(&self, op: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        match self.file.lock() {
            Ok(mut file) => op(&mut file),
            Err(_) => Err(io::Error::other("log file lock poisoned")),
        }
    }
}

impl Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.locked(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.locked(File::flush)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLog {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// `logging.file` target; missing parent directories are created and existing content is kept.
fn open_log(path: &Path) -> Result<SharedLog> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::operation("prepare_log_dir", format!("{}: {e}", dir.display())))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::operation("open_log", format!("cannot append to {}: {e}", path.display())))?;

    Ok(SharedLog {
        file: Arc::new(Mutex::new(file)),
    })
}

#[allow(clippy::needless_pass_by_value)]
fn subscriber_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::operation("install_subscriber", format!("another global subscriber is set: {e}"))
}
