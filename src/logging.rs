//! Per-invocation logging context.
//!
//! Each command builds one `LogContext`. It installs a subscriber with two
//! layers for the command's duration: a terse console layer on stderr and a
//! DEBUG file layer. The file can be moved once the task directory exists.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, Layer};

/// Log file name.
pub const LOG_FILE_NAME: &str = "crab.log";

/// Console verbosity from `-v` / `-q` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, 0) => Verbosity::Normal,
            (false, 1) => Verbosity::Verbose,
            (false, _) => Verbosity::Trace,
        }
    }

    fn level(&self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::WARN,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Verbose => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

struct LogFileInner {
    path: PathBuf,
    file: File,
}

/// Shared handle to the log file; clones write to the same file.
#[derive(Clone)]
pub struct LogFile {
    inner: Arc<Mutex<LogFileInner>>,
}

impl LogFile {
    /// Open (append) a log file, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = open_append(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(LogFileInner {
                path: path.to_path_buf(),
                file,
            })),
        })
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, LogFileInner>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))
    }

    pub fn path(&self) -> PathBuf {
        self.lock()
            .map(|inner| inner.path.clone())
            .unwrap_or_default()
    }

    /// Move the log into `dir`, keeping what was written so far.
    pub fn relocate(&self, dir: &Path) -> io::Result<PathBuf> {
        let mut inner = self.lock()?;
        let target = dir.join(LOG_FILE_NAME);
        if target == inner.path {
            return Ok(target);
        }
        inner.file.flush()?;

        let mut new_file = open_append(&target)?;
        let previous = fs::read(&inner.path)?;
        new_file.write_all(&previous)?;
        fs::remove_file(&inner.path)?;

        inner.file = new_file;
        inner.path = target.clone();
        Ok(target)
    }

    /// Write a raw line, bypassing the subscriber.
    pub fn append_line(&self, line: &str) -> io::Result<()> {
        let mut inner = self.lock()?;
        writeln!(inner.file, "{}", line)?;
        inner.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.file.flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Logging for one command invocation.
pub struct LogContext {
    file: LogFile,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogContext {
    /// Install console and file logging until the context is dropped.
    pub fn init(log_path: &Path, verbosity: Verbosity) -> io::Result<Self> {
        let file = LogFile::open(log_path)?;

        let console = fmt::layer()
            .with_writer(io::stderr)
            .without_time()
            .with_target(false)
            .with_filter(verbosity.level());
        let to_file = fmt::layer()
            .with_ansi(false)
            .with_writer(file.clone())
            .with_filter(LevelFilter::DEBUG);

        let subscriber = tracing_subscriber::registry().with(console).with(to_file);
        let guard = tracing::subscriber::set_default(subscriber);

        Ok(Self {
            file,
            _guard: guard,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.file.path()
    }

    pub fn file(&self) -> LogFile {
        self.file.clone()
    }

    /// Move the log file into a task directory.
    pub fn relocate(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = self.file.relocate(dir)?;
        tracing::debug!(path = %path.display(), "log file relocated");
        Ok(path)
    }

    /// The closing line every command prints.
    pub fn location_message(&self) -> String {
        format!("Log file is {}", self.log_path().display())
    }
}
