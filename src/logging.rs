//! Logging setup
//!
//! CLI commands log to stderr at `warn` unless `RUST_LOG` says otherwise. The
//! daemon logs either to stderr (`--foreground`) or to a size-rotated file in
//! the XDG data directory, and follows `debug`/`log_level` changes at runtime.

use color_eyre::eyre::{self, Context, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::config::Settings;

/// Log file name inside the data directory
pub const LOG_FILE_NAME: &str = "daemon.log";

const MAX_LOG_SIZE: u64 = 1_000_000;

/// A file appender that rotates on size.
///
/// Keeps two files: the active log and one `.old` backup. The file is
/// re-created if deleted externally and is created with 0600 permissions.
pub struct RotatingFileAppender {
    path: PathBuf,
    backup_path: PathBuf,
    max_size_bytes: u64,
    file: Mutex<Option<File>>,
}

impl RotatingFileAppender {
    pub fn new(dir: impl Into<PathBuf>, filename: &str, max_size_bytes: u64) -> Self {
        let dir = dir.into();
        Self {
            path: dir.join(filename),
            backup_path: dir.join(format!("{filename}.old")),
            max_size_bytes,
            file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_secure(path: &Path, append: bool) -> io::Result<File> {
        let mut options = fs::OpenOptions::new();
        options.create(true).write(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        options.open(path)
    }

    /// Open (or re-open after external deletion) the active file
    fn get_file<'a>(&self, slot: &'a mut Option<File>) -> io::Result<&'a mut File> {
        if !self.path.exists() {
            *slot = None;
        }
        if slot.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            *slot = Some(Self::open_secure(&self.path, true)?);
        }
        slot.as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }

    /// current -> backup, then start an empty current
    fn rotate(&self, slot: &mut Option<File>) -> io::Result<()> {
        *slot = None;
        if self.path.exists() {
            fs::rename(&self.path, &self.backup_path)?;
        }
        *slot = Some(Self::open_secure(&self.path, false)?);
        Ok(())
    }
}

impl Write for RotatingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("Log mutex poisoned: {e}")))?;

        let current_size = match self.get_file(&mut slot) {
            Ok(f) => f.metadata()?.len(),
            Err(_) => 0,
        };

        if current_size >= self.max_size_bytes
            && let Err(e) = self.rotate(&mut slot)
        {
            eprintln!("Failed to rotate log file: {e}");
        }

        self.get_file(&mut slot)?.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("Log mutex poisoned: {e}")))?;
        if let Some(file) = slot.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Directory holding the daemon log
///
/// # Errors
/// Returns an error if the XDG data directory cannot be determined.
pub fn log_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .ok_or_else(|| eyre::eyre!("Could not determine data directory"))?
        .join("raop-toggle"))
}

/// Filter directive for the daemon
#[must_use]
pub fn daemon_directive(settings: &Settings) -> String {
    format!("raop_toggle={}", settings.effective_log_level())
}

/// Initialize logging for one-shot CLI commands
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed (tests); that is fine
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Where daemon logs go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File,
}

/// Keeps the daemon's log pipeline alive and adjustable
pub struct DaemonLogging {
    filter: reload::Handle<EnvFilter, Registry>,
    /// Set when `RUST_LOG` pins the filter
    pinned: bool,
    _guard: Option<WorkerGuard>,
}

impl DaemonLogging {
    /// Install the daemon subscriber
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be used or a global
    /// subscriber is already installed.
    pub fn init(settings: &Settings, target: LogTarget) -> Result<Self> {
        let (filter, pinned) = match EnvFilter::try_from_default_env() {
            Ok(filter) => (filter, true),
            Err(_) => (EnvFilter::new(daemon_directive(settings)), false),
        };
        let (filter_layer, handle) = reload::Layer::new(filter);

        let (writer, guard, ansi) = match target {
            LogTarget::Stderr => (BoxMakeWriter::new(io::stderr), None, true),
            LogTarget::File => {
                let dir = log_dir()?;
                fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create log dir: {dir:?}"))?;
                let appender = RotatingFileAppender::new(dir, LOG_FILE_NAME, MAX_LOG_SIZE);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                (BoxMakeWriter::new(non_blocking), Some(guard), false)
            }
        };

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi),
            )
            .try_init()
            .context("Failed to install log subscriber")?;

        Ok(Self {
            filter: handle,
            pinned,
            _guard: guard,
        })
    }

    /// Follow a settings change; a no-op when `RUST_LOG` is set
    pub fn apply(&self, settings: &Settings) {
        if self.pinned {
            return;
        }
        let directive = daemon_directive(settings);
        if let Err(e) = self.filter.reload(EnvFilter::new(&directive)) {
            eprintln!("Failed to update log filter to {directive}: {e}");
        }
    }
}
