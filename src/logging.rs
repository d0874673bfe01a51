//! Process-wide logger installation, matching the levels named in the public API.
//!
//! A single [`log::Log`] implementor is installed once via [`log::set_boxed_logger`],
//! the same approach `proteus-cli`'s `SharedLogger` takes, rather than pulling in a
//! separate logging-setup crate.

use log::{LevelFilter, Log, Metadata, Record};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;

/// Log verbosity levels, matching the constants named in the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Quiet = -8,
    Error = 16,
    Warning = 24,
    Info = 32,
}

impl LogLevel {
    fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Quiet => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
        }
    }
}

struct GraphLogger {
    threshold: AtomicI32,
}

impl Log for GraphLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= level_filter_from_threshold(self.threshold.load(Ordering::Relaxed))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

fn level_filter_from_threshold(threshold: i32) -> LevelFilter {
    if threshold <= LogLevel::Quiet as i32 {
        LevelFilter::Off
    } else if threshold <= LogLevel::Error as i32 {
        LevelFilter::Error
    } else if threshold <= LogLevel::Warning as i32 {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    }
}

static LOGGER: OnceLock<&'static GraphLogger> = OnceLock::new();

/// Install the process-wide logger (idempotent) and set its verbosity.
///
/// Matches the public `set_logging(level)` free function. Safe to call
/// repeatedly; later calls just adjust the threshold.
pub fn set_logging(level: LogLevel) {
    let logger = LOGGER.get_or_init(|| {
        let logger: &'static GraphLogger = Box::leak(Box::new(GraphLogger {
            threshold: AtomicI32::new(level as i32),
        }));
        // Ignore the error: a prior call to `set_logging` already installed us,
        // or a host application installed its own logger first.
        let _ = log::set_logger(logger).map(|_| log::set_max_level(LevelFilter::Info));
        logger
    });
    logger.threshold.store(level as i32, Ordering::Relaxed);
    log::set_max_level(level.to_filter());
}
