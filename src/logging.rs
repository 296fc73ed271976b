//! Logging Configuration
//!
//! Structured logging to stderr plus an append-only log file with
//! size-based rotation and age-based retention.
//!
//! The active file is `<dir>/backup-validator.log`. When a write would push
//! it past `max_file_bytes`, it is renamed to
//! `backup-validator.<timestamp>.log` and a fresh file is opened. Rotated
//! files older than `retention_days` are deleted after each rotation and at
//! start-up.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Active log file name
pub const LOG_FILE_NAME: &str = "backup-validator.log";

const LOG_FILE_PREFIX: &str = "backup-validator.";
const LOG_FILE_SUFFIX: &str = ".log";

/// Log format configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plain text format
    #[default]
    Plain,
    /// JSON structured format
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// Log level configuration
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: LogLevel,

    /// Log format (plain, json)
    pub format: LogFormat,

    /// Include file and line number in logs
    pub file_and_line: bool,

    /// Log directory (stderr only if not set)
    pub dir: Option<PathBuf>,

    /// Rotate the log file once it reaches this size
    pub max_file_bytes: u64,

    /// Delete rotated files older than this many days
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Plain,
            file_and_line: false,
            dir: Some(PathBuf::from("logs")),
            max_file_bytes: 10 * 1024 * 1024,
            retention_days: 7,
        }
    }
}

impl LoggingConfig {
    /// Retention window for rotated files
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    /// Initialize the logging system
    ///
    /// `RUST_LOG` takes precedence over the configured level.
    pub fn init(&self) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()));

        let mut layers = vec![self.fmt_layer(io::stderr, true)];
        if let Some(dir) = &self.dir {
            let writer = RotatingFileWriter::new(dir, self.max_file_bytes, self.retention())
                .with_context(|| format!("Failed to open log file in {:?}", dir))?;
            layers.push(self.fmt_layer(writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()?;

        tracing::info!(
            "Logging initialized: level={}, format={:?}, dir={:?}",
            self.level,
            self.format,
            self.dir
        );

        Ok(())
    }

    fn fmt_layer<W>(&self, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_file(self.file_and_line)
            .with_line_number(self.file_and_line);

        match self.format {
            LogFormat::Plain => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

/// Request ID for tracking requests across log entries
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    /// Generate a new request ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared handle to the rotating log file; usable as a tracing writer
#[derive(Debug, Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

#[derive(Debug)]
struct RotatingFile {
    dir: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    retention: Duration,
}

impl RotatingFileWriter {
    /// Open (or create) the active log file in `dir`
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64, retention: Duration) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let (file, size) = open_active(&dir)?;
        let rotating = RotatingFile {
            dir,
            file,
            size,
            max_bytes,
            retention,
        };
        rotating.prune();
        Ok(Self {
            inner: Arc::new(Mutex::new(rotating)),
        })
    }

    /// Path of the file currently being written
    pub fn active_path(&self) -> PathBuf {
        match self.inner.lock() {
            Ok(inner) => inner.dir.join(LOG_FILE_NAME),
            Err(poisoned) => poisoned.into_inner().dir.join(LOG_FILE_NAME),
        }
    }
}

fn open_active(dir: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

impl RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size > 0 && self.size + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let mut target = self
            .dir
            .join(format!("{LOG_FILE_PREFIX}{stamp}{LOG_FILE_SUFFIX}"));
        let mut n = 1;
        while target.exists() {
            target = self
                .dir
                .join(format!("{LOG_FILE_PREFIX}{stamp}-{n}{LOG_FILE_SUFFIX}"));
            n += 1;
        }

        fs::rename(self.dir.join(LOG_FILE_NAME), &target)?;
        let (file, size) = open_active(&self.dir)?;
        self.file = file;
        self.size = size;
        self.prune();
        Ok(())
    }

    /// Delete rotated files whose last modification is past retention.
    fn prune(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let Some(cutoff) = SystemTime::now().checked_sub(self.retention) else {
            return;
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == LOG_FILE_NAME
                || !name.starts_with(LOG_FILE_PREFIX)
                || !name.ends_with(LOG_FILE_SUFFIX)
            {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if expired {
                // Not logged: this runs inside the log writer.
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?
            .file
            .flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rotated_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.file_name().unwrap() != LOG_FILE_NAME)
            .collect()
    }

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_display_and_parse() {
        assert_eq!(LogLevel::Info.to_string(), "info");
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Info > LogLevel::Debug);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Plain".parse::<LogFormat>(), Ok(LogFormat::Plain));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Plain);
        assert_eq!(config.dir, Some(PathBuf::from("logs")));
        assert_eq!(config.retention(), Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn test_request_id_unique() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1.0, id2.0);
        assert_eq!(id1.to_string().len(), 36);
    }

    #[test]
    fn test_writer_appends() {
        let dir = TempDir::new().unwrap();
        let mut writer = RotatingFileWriter::new(dir.path(), 1024, Duration::from_secs(3600)).unwrap();

        writer.write_all(b"first\n").unwrap();
        writer.write_all(b"second\n").unwrap();
        writer.flush().unwrap();

        let contents = fs::read_to_string(writer.active_path()).unwrap();
        assert_eq!(contents, "first\nsecond\n");
        assert!(rotated_files(dir.path()).is_empty());
    }

    #[test]
    fn test_writer_rotates_at_size_limit() {
        let dir = TempDir::new().unwrap();
        let mut writer = RotatingFileWriter::new(dir.path(), 16, Duration::from_secs(3600)).unwrap();

        writer.write_all(b"0123456789\n").unwrap();
        writer.write_all(b"abcdefghij\n").unwrap();
        writer.write_all(b"ABCDEFGHIJ\n").unwrap();
        writer.flush().unwrap();

        let contents = fs::read_to_string(writer.active_path()).unwrap();
        assert_eq!(contents, "ABCDEFGHIJ\n");
        assert_eq!(rotated_files(dir.path()).len(), 2);
    }

    #[test]
    fn test_oversized_record_not_split() {
        let dir = TempDir::new().unwrap();
        let mut writer = RotatingFileWriter::new(dir.path(), 4, Duration::from_secs(3600)).unwrap();

        writer.write_all(b"a much longer line\n").unwrap();
        let contents = fs::read_to_string(writer.active_path()).unwrap();
        assert_eq!(contents, "a much longer line\n");
    }

    #[test]
    fn test_prune_removes_expired_rotations() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("backup-validator.20000101-000000.000.log");
        let recent = dir.path().join("backup-validator.20991231-000000.000.log");
        let unrelated = dir.path().join("notes.txt");
        fs::write(&old, "old").unwrap();
        fs::write(&recent, "recent").unwrap();
        fs::write(&unrelated, "keep").unwrap();

        let month_ago = SystemTime::now() - Duration::from_secs(30 * 24 * 3600);
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(month_ago)
            .unwrap();

        let _writer =
            RotatingFileWriter::new(dir.path(), 1024, Duration::from_secs(7 * 24 * 3600)).unwrap();
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_writer_used_by_subscriber() {
        use tracing_subscriber::fmt;

        let dir = TempDir::new().unwrap();
        let writer = RotatingFileWriter::new(dir.path(), 1024 * 1024, Duration::from_secs(3600)).unwrap();
        let subscriber = fmt()
            .with_writer(writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(caller = "10.0.0.1", "Executing command");
        });

        let contents = fs::read_to_string(writer.active_path()).unwrap();
        assert!(contents.contains("INFO"));
        assert!(contents.contains("Executing command"));
        assert!(contents.contains("caller=\"10.0.0.1\""));
    }
}
