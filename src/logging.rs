use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use error_stack::ResultExt;
use indicatif::MultiProgress;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt::writer::MakeWriterExt, prelude::*, Registry};

/// How many old copies of each log file to keep
pub const MAX_LOG_BACKUPS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Could not create log file {}", .0.display())]
    CreateFile(PathBuf),
    #[error("Could not rotate old log file {}", .0.display())]
    Rotate(PathBuf),
    #[error("A global tracing subscriber was already set")]
    AlreadySet,
}

/// Convert the `log` level filter that `clap-verbosity-flag` gives into the `tracing` equivalent.
pub fn to_tracing_level(level: log::LevelFilter) -> LevelFilter {
    match level {
        log::LevelFilter::Off => LevelFilter::OFF,
        log::LevelFilter::Error => LevelFilter::ERROR,
        log::LevelFilter::Warn => LevelFilter::WARN,
        log::LevelFilter::Info => LevelFilter::INFO,
        log::LevelFilter::Debug => LevelFilter::DEBUG,
        log::LevelFilter::Trace => LevelFilter::TRACE,
    }
}

/// Log file name for an experiment, with the rank appended if this process
/// only runs one worker.
pub fn log_file_name(experiment_id: &str, rank: Option<usize>) -> String {
    match rank {
        Some(r) => format!("log_{experiment_id}_rank{r}.txt"),
        None => format!("log_{experiment_id}.txt"),
    }
}

/// Move `path` to `path.1`, `path.1` to `path.2`, and so on, dropping the oldest
/// once there are [`MAX_LOG_BACKUPS`].
pub fn rotate_log_file(path: &Path) -> error_stack::Result<(), LoggingError> {
    if !path.exists() {
        return Ok(());
    }

    let backup = |n: usize| {
        let mut s = path.as_os_str().to_os_string();
        s.push(format!(".{n}"));
        PathBuf::from(s)
    };

    for n in (1..MAX_LOG_BACKUPS).rev() {
        let older = backup(n);
        if older.exists() {
            let newer = backup(n + 1);
            std::fs::rename(&older, &newer).change_context_lazy(|| LoggingError::Rotate(older.clone()))?;
        }
    }
    std::fs::rename(path, backup(1)).change_context_lazy(|| LoggingError::Rotate(path.to_path_buf()))
}

fn create_log_file(path: &Path) -> error_stack::Result<std::fs::File, LoggingError> {
    rotate_log_file(path)?;
    std::fs::File::create(path).change_context_lazy(|| LoggingError::CreateFile(path.to_path_buf()))
}

/// Set up logging to stderr at `level`, to `log_path` at DEBUG, and to `log_path` with
/// ".json" appended at WARN as JSON lines.
///
/// Messages to stderr are printed with `mpbar` suspended so that they do not
/// get mixed up with the progress bars. Previous log files are rotated.
pub fn init_logging(
    log_path: &Path,
    level: log::LevelFilter,
    mpbar: Arc<MultiProgress>,
) -> error_stack::Result<(), LoggingError> {
    // The Mutex is required by tracing_subscriber to make something that implements
    // std::io::Write implement tracing_subscriber::writer::MakeWriter.
    let stderr = Mutex::new(ConsoleLogger::new(mpbar));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(false)
        .with_writer(stderr)
        .with_filter(to_tracing_level(level));

    let file = create_log_file(log_path)?.with_max_level(tracing::Level::DEBUG);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(file);

    let mut json_path = log_path.as_os_str().to_os_string();
    json_path.push(".json");
    let json_file = create_log_file(Path::new(&json_path))?.with_max_level(tracing::Level::WARN);
    let json_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(json_file)
        .json();

    let subscriber = Registry::default()
        .with(stderr_layer)
        .with(file_layer)
        .with(json_layer);

    tracing::subscriber::set_global_default(subscriber).change_context(LoggingError::AlreadySet)
}

struct ConsoleLogger {
    stderr: std::io::Stderr,
    mpbar: Arc<MultiProgress>,
}

impl ConsoleLogger {
    fn new(mpbar: Arc<MultiProgress>) -> Self {
        let stderr = std::io::stderr();
        Self { stderr, mpbar }
    }
}

impl Write for ConsoleLogger {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.mpbar.suspend(|| self.stderr.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.mpbar.suspend(|| self.stderr.flush())
    }
}
