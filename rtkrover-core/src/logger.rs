//! Level-tagged log callback port.
//!
//! The core never talks to a logging framework directly; the embedding
//! application installs a callback and routes messages wherever it wants
//! (the native daemon forwards to the `log` facade). Without a callback all
//! output is suppressed.
//!
//! The callback is never invoked while the stats guard is held.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Log severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
        }
    }
}

/// The installed callback. The message is fully formatted before the call;
/// the tag is a stable short component identifier.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str, &str) + Send + Sync>;

/// Shared, swappable logging port.
///
/// Clones share the same callback slot, so `set()` through one clone is
/// visible to all of them.
#[derive(Clone, Default)]
pub struct Logger {
    callback: Arc<Mutex<Option<LogCallback>>>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or remove the callback.
    pub fn set(&self, callback: Option<LogCallback>) {
        *self.callback.lock().unwrap() = callback;
    }

    /// Emit one message. No-op when no callback is installed.
    pub fn log(&self, level: LogLevel, tag: &str, message: &str) {
        // Clone the callback out of the slot so it runs without our lock held.
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(level, tag, message);
        }
    }

    pub fn error(&self, tag: &str, message: &str) {
        self.log(LogLevel::Error, tag, message);
    }

    pub fn warn(&self, tag: &str, message: &str) {
        self.log(LogLevel::Warning, tag, message);
    }

    pub fn info(&self, tag: &str, message: &str) {
        self.log(LogLevel::Info, tag, message);
    }

    pub fn debug(&self, tag: &str, message: &str) {
        self.log(LogLevel::Debug, tag, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let installed = self.callback.lock().map(|g| g.is_some()).unwrap_or(false);
        f.debug_struct("Logger").field("installed", &installed).finish()
    }
}
