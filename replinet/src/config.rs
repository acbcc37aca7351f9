//! Process-wide configuration.
//!
//! All configuration except the per-connection packet size lives here. The
//! [`Config`] is shared into every [`Connection`] at creation time, so tests
//! can instantiate multiple independent cores with different settings.
//!
//! [`Connection`]: crate::Connection

use std::{
    fmt,
    fs::File,
    io::Write,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Severity of a log line emitted through a [`Config`] sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Verbose diagnostics, suppressed unless [`Config::debug_on`] was
    /// called.
    Debug,
    /// Lifecycle events: joins, view changes, close.
    Info,
    /// Recoverable anomalies, such as a torn-down reassembly buffer.
    Warn,
    /// Hard failures.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

enum LogSink {
    /// Forward to the `tracing` subscriber of the process.
    Tracing,
    /// Append lines to a file handle.
    File(File),
    /// Hand lines to an application callback.
    Callback(LogCallback),
}

/// Process-wide configuration: log sink, debug gate and self-timestamping.
///
/// The default sink forwards to [`tracing`], so embedders that already run a
/// subscriber need not configure anything.
pub struct Config {
    sink: Mutex<LogSink>,
    debug: AtomicBool,
    self_tstamp: AtomicBool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sink: Mutex::new(LogSink::Tracing),
            debug: AtomicBool::new(false),
            self_tstamp: AtomicBool::new(false),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("debug", &self.debug.load(Ordering::Relaxed))
            .field("self_tstamp", &self.self_tstamp.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Creates a configuration with default settings, ready to share between
    /// connections.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Routes log output to `file` instead of the current sink.
    pub fn set_log_file(&self, file: File) {
        *self.sink.lock().expect("sink lock poisoned") = LogSink::File(file);
    }

    /// Routes log output to `callback` instead of the current sink.
    ///
    /// The callback receives the severity and the formatted line, without a
    /// trailing newline.
    pub fn set_log_callback(&self, callback: impl Fn(LogLevel, &str) + Send + Sync + 'static) {
        *self.sink.lock().expect("sink lock poisoned") = LogSink::Callback(Box::new(callback));
    }

    /// Prefixes log lines with a seconds-since-epoch timestamp.
    pub fn self_tstamp_on(&self) {
        self.self_tstamp.store(true, Ordering::Relaxed);
    }

    /// Stops prefixing log lines with a timestamp.
    pub fn self_tstamp_off(&self) {
        self.self_tstamp.store(false, Ordering::Relaxed);
    }

    /// Enables [`LogLevel::Debug`] output.
    pub fn debug_on(&self) {
        self.debug.store(true, Ordering::Relaxed);
    }

    /// Disables [`LogLevel::Debug`] output.
    pub fn debug_off(&self) {
        self.debug.store(false, Ordering::Relaxed);
    }

    /// Whether [`LogLevel::Debug`] output is enabled.
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub(crate) fn log(&self, level: LogLevel, msg: &str) {
        if level == LogLevel::Debug && !self.debug_enabled() {
            return;
        }

        let mut sink = self.sink.lock().expect("sink lock poisoned");
        match &mut *sink {
            LogSink::Tracing => match level {
                LogLevel::Debug => tracing::debug!("{msg}"),
                LogLevel::Info => tracing::info!("{msg}"),
                LogLevel::Warn => tracing::warn!("{msg}"),
                LogLevel::Error => tracing::error!("{msg}"),
            },
            LogSink::File(file) => {
                let line = self.stamp(level, msg);
                let _ = writeln!(file, "{line}");
            }
            LogSink::Callback(callback) => {
                let line = self.stamp(level, msg);
                callback(level, &line);
            }
        }
    }

    fn stamp(&self, level: LogLevel, msg: &str) -> String {
        if self.self_tstamp.load(Ordering::Relaxed) {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            format!("[{}.{:03}] {level}: {msg}", now.as_secs(), now.subsec_millis())
        } else {
            format!("{level}: {msg}")
        }
    }
}
