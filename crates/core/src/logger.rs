use crate::config::LoggingSection;
use crate::error::{Error, Result};

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{Dispatch, Event, Level, Subscriber, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    Registry,
    filter::LevelFilter,
    fmt::{
        FmtContext, FormatEvent, FormatFields, format,
        time::{ChronoLocal, FormatTime},
    },
    layer::SubscriberExt,
    prelude::*,
    registry::LookupSpan,
};

/// Name written in the logger column of every record.
pub const LOGGER_NAME: &str = "AdcircSupportTools";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";
const SEPARATOR: &str = " : ";

/// Map a severity name (`DEBUG`, `INFO`, `WARNING`, ...) onto a filter.
pub fn parse_level(name: &str) -> Result<LevelFilter> {
    match name.trim().to_ascii_uppercase().as_str() {
        "NOTSET" | "TRACE" => Ok(LevelFilter::TRACE),
        "DEBUG" => Ok(LevelFilter::DEBUG),
        "INFO" => Ok(LevelFilter::INFO),
        "WARNING" | "WARN" => Ok(LevelFilter::WARN),
        "ERROR" | "CRITICAL" | "FATAL" => Ok(LevelFilter::ERROR),
        "OFF" => Ok(LevelFilter::OFF),
        _ => Err(Error::InvalidLogLevel(name.to_string())),
    }
}

fn level_name(level: &Level) -> &'static str {
    if *level == Level::WARN {
        "WARNING"
    } else {
        level.as_str()
    }
}

/// `timestamp : level : function : module : logger : message`
///
/// The function column is the innermost entered span, which for
/// `#[instrument]`ed code is the function name.
struct RecordFormat {
    timer: ChronoLocal,
}

impl RecordFormat {
    fn new() -> Self {
        Self {
            timer: ChronoLocal::new(TIMESTAMP_FORMAT.to_string()),
        }
    }
}

impl<S, N> FormatEvent<S, N> for RecordFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let function = ctx.lookup_current().map(|span| span.name()).unwrap_or("-");
        let module = meta.module_path().unwrap_or_else(|| meta.target());

        self.timer.format_time(&mut writer)?;
        write!(
            writer,
            "{SEPARATOR}{}{SEPARATOR}{function}{SEPARATOR}{module}{SEPARATOR}{LOGGER_NAME}{SEPARATOR}",
            level_name(meta.level()),
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// A configured file logger. Dropping it flushes pending records.
#[derive(Debug)]
pub struct LoggerHandle {
    dispatch: Dispatch,
    level: LevelFilter,
    log_file: PathBuf,
    _guard: WorkerGuard,
}

impl LoggerHandle {
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_file.parent()
    }

    /// Run `f` with this logger as the thread's default subscriber.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

/// Build a file logger from the logging section.
///
/// The level is validated before anything touches the filesystem. The log
/// directory is created if missing and the log file is truncated.
pub fn init_logging(section: &LoggingSection, instance: Option<&str>) -> Result<LoggerHandle> {
    let level = parse_level(&section.log_level)?;
    let log_dir = section.log_dir(instance);
    open_file_logger(level, &log_dir)
}

/// Same as [`init_logging`] for an already-resolved directory.
pub fn open_file_logger(level: LevelFilter, log_dir: &Path) -> Result<LoggerHandle> {
    // Missing parents are created; an existing directory is fine.
    fs::create_dir_all(log_dir).map_err(|source| Error::LogDir {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let log_file = log_dir.join(crate::config::LOG_FILE_NAME);
    // Truncate rather than append: each run starts a fresh log.
    let file = File::create(&log_file).map_err(|e| Error::io(&log_file, e))?;
    let (nb, guard) = tracing_appender::non_blocking(file);

    // Plain-text file layer, no ANSI colors.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(nb)
        .event_format(RecordFormat::new())
        .with_filter(level);

    let subscriber = Registry::default().with(file_layer);

    Ok(LoggerHandle {
        dispatch: Dispatch::new(subscriber),
        level,
        log_file,
        _guard: guard,
    })
}

/// Caller-owned logging state. At most one logger is ever stored in a
/// context; callers share one context for the life of the process.
#[derive(Debug, Default)]
pub struct LoggingContext {
    handle: Option<LoggerHandle>,
}

impl LoggingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&LoggerHandle> {
        self.handle.as_ref()
    }

    /// Store `handle` unless a logger is already present. Returns whether it was stored.
    pub(crate) fn set(&mut self, handle: LoggerHandle) -> bool {
        if self.handle.is_some() {
            return false;
        }
        self.handle = Some(handle);
        true
    }

    /// Install the stored logger as the process-wide default subscriber.
    pub fn install_global(&self) -> Result<()> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| Error::LoggerInit("logging has not been initialized".to_string()))?;
        // Fails instead of panicking if another subscriber is already installed.
        tracing::dispatcher::set_global_default(handle.dispatch.clone())
            .map_err(|e| Error::LoggerInit(e.to_string()))?;

        // Panic hook to route panics through tracing (to reach the log file).
        install_panic_hook();
        Ok(())
    }

    /// Run `f` under the stored logger, or unchanged when there is none.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.handle {
            Some(handle) => handle.in_scope(f),
            None => f(),
        }
    }
}

/// Install a panic hook that logs panics via `tracing::error!`.
fn install_panic_hook() {
    // Only install once; subsequent calls keep the first hook.
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let default = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            // Forward to tracing first so it's captured by the file layer.
            if let Some(s) = info.payload().downcast_ref::<&str>() {
                error!(target: "panic", "panic: {}", s);
            } else if let Some(s) = info.payload().downcast_ref::<String>() {
                error!(target: "panic", "panic: {}", s);
            } else {
                error!(target: "panic", "panic occurred");
            }
            // Still call the default hook so backtraces (if enabled) print to stderr.
            default(info);
        }));
    });
}
