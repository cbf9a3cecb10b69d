#![deny(missing_docs)]
//! Shared logging utilities for the archiver workspace.
//!
//! This crate provides the `engine_*` logging macros used across the codebase,
//! the per-bookmark [`DebugLog`] that is stored next to every archive, and a
//! minimal test initializer for the global logger.
//!
//! A debug log is rendered one entry per line, each line starting with a level
//! token (`[DEBU]`, `[INFO]`, `[WARN]`, `[ERRO]`). Lines that do not start with
//! a token continue the previous entry.

use std::fmt;

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! engine_trace {
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Records a debug-level line for `stage` into a [`DebugLog`].
#[macro_export]
macro_rules! stage_debug {
    ($log:expr, $stage:expr, $($arg:tt)*) => {{
        $log.record($crate::LogLevel::Debug, $stage, format!($($arg)*));
    }};
}

/// Records an info-level line for `stage` into a [`DebugLog`].
#[macro_export]
macro_rules! stage_info {
    ($log:expr, $stage:expr, $($arg:tt)*) => {{
        $log.record($crate::LogLevel::Info, $stage, format!($($arg)*));
    }};
}

/// Records a warn-level line for `stage` into a [`DebugLog`].
#[macro_export]
macro_rules! stage_warn {
    ($log:expr, $stage:expr, $($arg:tt)*) => {{
        $log.record($crate::LogLevel::Warn, $stage, format!($($arg)*));
    }};
}

/// Records an error-level line for `stage` into a [`DebugLog`].
#[macro_export]
macro_rules! stage_error {
    ($log:expr, $stage:expr, $($arg:tt)*) => {{
        $log.record($crate::LogLevel::Error, $stage, format!($($arg)*));
    }};
}

/// Severity of a debug log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure, recoverable or not.
    Error,
}

impl LogLevel {
    /// The level token written at the start of a rendered line.
    pub fn token(self) -> &'static str {
        match self {
            LogLevel::Debug => "[DEBU]",
            LogLevel::Info => "[INFO]",
            LogLevel::Warn => "[WARN]",
            LogLevel::Error => "[ERRO]",
        }
    }

    /// Parses a level token, returning `None` for anything else.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "[DEBU]" => Some(LogLevel::Debug),
            "[INFO]" => Some(LogLevel::Info),
            "[WARN]" => Some(LogLevel::Warn),
            "[ERRO]" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn facade_level(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One recorded entry of a [`DebugLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Entry severity.
    pub level: LogLevel,
    /// Pipeline stage that produced the entry.
    pub stage: String,
    /// Message text; may span several lines.
    pub message: String,
}

/// Append-only, ordered log of one archival run.
///
/// Every recorded entry is mirrored to the `log` facade with the stage name as
/// target, so the same lines show up in the process log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugLog {
    entries: Vec<LogEntry>,
}

impl DebugLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and forwards it to the global logger.
    pub fn record(&mut self, level: LogLevel, stage: &str, message: impl Into<String>) {
        let message = message.into();
        log::log!(target: stage, level.facade_level(), "{message}");
        self.entries.push(LogEntry {
            level,
            stage: stage.to_string(),
            message,
        });
    }

    /// Entries in recording order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries at or above `level`.
    pub fn count_at_least(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level >= level).count()
    }

    /// Returns true when no entry has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the log in its stored text form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry.level.token());
            out.push(' ');
            out.push_str(&entry.stage);
            out.push_str(": ");
            out.push_str(entry.message.trim_end());
            out.push('\n');
        }
        out
    }
}

/// One logical entry read back from a stored log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Entry severity.
    pub level: LogLevel,
    /// Entry text without the level token; continuation lines are joined with `\n`.
    pub line: String,
}

/// Parses a stored debug log.
///
/// Lines without a leading level token are appended to the previous entry. A
/// continuation line that appears before any token starts an `Info` entry.
pub fn parse_log(text: &str) -> Vec<LogLine> {
    let mut lines: Vec<LogLine> = Vec::new();
    for raw in text.lines() {
        if raw.trim().is_empty() {
            continue;
        }
        let token = raw.get(..6).and_then(LogLevel::from_token);
        match (token, lines.last_mut()) {
            (Some(level), _) => lines.push(LogLine {
                level,
                line: raw[6..].trim_start().to_string(),
            }),
            (None, Some(previous)) => {
                previous.line.push('\n');
                previous.line.push_str(raw);
            }
            (None, None) => lines.push(LogLine {
                level: LogLevel::Info,
                line: raw.to_string(),
            }),
        }
    }
    lines
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}
