//! A minimal async logger example using Tokio.
//!
//! This module shows how to build a very small, dependency-free (besides tokio)
//! asynchronous logger. It spawns a background task that receives log messages
//! over an mpsc channel and writes them to a file (or stdout) without blocking
//! your async tasks.
//!
//! Example
//! -------
//!
//! ```ignore
//! use tiercache::utilities::logger::init_file_logger;
//! use tokio::time::{sleep, Duration};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Start logger writing to a file (create if missing, append if exists)
//!     let (logger, _task) = init_file_logger("cache.log").await.expect("init logger");
//!
//!     logger.info("cache engine starting up...");
//!     logger.info("Listening on 127.0.0.1:8080");
//!     logger.warn("This is a warning");
//!     logger.error("This is an error");
//!
//!     // Simulate some async work
//!     sleep(Duration::from_millis(50)).await;
//!
//!     // When `logger` is dropped, the channel closes and the background task
//!     // will flush and exit gracefully.
//! }
//! ```

use crate::err::Result;
use crate::global_var::{DEBUG_MODE, LOGGER_CELL};
use chrono::{DateTime, Utc};
use std::cmp::PartialEq;
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Log level for messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "\x1b[36mTRACE\x1b[0m",
            LogLevel::Debug => "\x1b[34mDEBUG\x1b[0m",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "\x1b[33mWARN \x1b[0m",
            LogLevel::Error => "\x1b[31mERROR\x1b[0m",
        };
        write!(f, "{}", s)
    }
}

/// A simple async logger handle. Cloning creates another sender handle.
#[derive(Clone, Debug)]
pub struct AsyncLogger {
    tx: mpsc::Sender<LogRecord>,
}

impl AsyncLogger {
    /// Log a message at a specific level.
    fn log<S: Into<String>>(&self, level: LogLevel, msg: S) {
        let str_msg = msg.into();
        match self.tx.try_send(LogRecord::new(level, str_msg)) {
            Ok(_) => {}
            Err(err) => {
                eprintln!("Failed to send log message: {}", err);
            }
        }
    }

    /// Request the logger task to flush and shut down.
    pub async fn shutdown(&self) {
        // Ignore send error (e.g., task already closed)
        let _ = self.tx.send(LogRecord::Shutdown).await;
    }

    pub fn trace<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Trace, msg);
    }
    pub fn debug<S: Into<String>>(&self, msg: S) {
        if *DEBUG_MODE {
            self.log(LogLevel::Debug, msg);
        }
    }
    pub fn info<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Info, msg);
    }
    pub fn warn<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Warn, msg);
    }
    pub fn error<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Error, msg);
    }
}

#[derive(Debug)]
enum LogRecord {
    Message {
        level: LogLevel,
        msg: String,
        ts_millis: i64,
    },
    Shutdown,
}

impl LogRecord {
    fn new(level: LogLevel, msg: String) -> Self {
        let ts_millis = Utc::now().timestamp_millis();
        Self::Message {
            level,
            msg,
            ts_millis,
        }
    }

    fn format_line(&self) -> Option<String> {
        match self {
            LogRecord::Message {
                level,
                msg,
                ts_millis,
            } => {
                // Format: 2025-10-08T21:22:33.123Z [LEVEL] message\n
                let dt = DateTime::from_timestamp_millis(*ts_millis).unwrap_or_else(|| Utc::now());
                let time_stamp = dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                Some(format!("{} [{}] {}\n", time_stamp, level, msg))
            }
            LogRecord::Shutdown => None,
        }
    }
}

/// Initialize a file-based async logger. Returns the logger handle and the background task handle.
/// Dropping the last logger handle will close the channel and allow the task to shut down.
pub async fn init_file_logger<P: AsRef<Path>>(path: P) -> Result<(AsyncLogger, JoinHandle<()>)> {
    // Keep a copy of the path so we can reopen the file if a writing error occurs.
    let path_buf = path.as_ref().to_path_buf();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path_buf)
        .await?;

    let (tx, mut rx) = mpsc::channel::<LogRecord>(1024);
    let writer = Mutex::new(BufWriter::new(file));

    let task = tokio::spawn(async move {
        while let Some(rec) = rx.recv().await {
            match &rec {
                LogRecord::Message {
                    level,
                    msg,
                    ts_millis,
                } => {
                    if let Some(line) = rec.format_line() {
                        {
                            let mut unique_writer = writer.lock().await;
                            let _ = unique_writer.write_all(line.as_bytes()).await;
                            let _ = unique_writer.flush().await;
                        }
                    }
                }
                LogRecord::Shutdown => {
                    break;
                }
            }
        }
        // Flush remaining data before exit
        {
            let mut unique_writer = writer.lock().await;
            let _ = unique_writer.flush().await;
        }
    });

    Ok((AsyncLogger { tx }, task))
}

pub(crate) struct Logger;

impl Deref for Logger {
    type Target = AsyncLogger;
    fn deref(&self) -> &Self::Target {
        if let Some(l) = LOGGER_CELL.get() {
            return l;
        }
        #[cfg(test)]
        {
            // In test builds, lazily install a fallback no-op logger so unit tests
            // can call LOGGER.*() without panicking even if the logger was not
            // explicitly initialized. The fallback keeps a channel alive but does
            // not spawn any async task or write to disk.
            let _ = LOGGER_CELL.set(test_fallback_logger());
            return LOGGER_CELL
                .get()
                .expect("LOGGER_CELL should be set by test fallback");
        }
        LOGGER_CELL.get().expect("LOGGER_CELL should be set")
    }
}

// A tiny, self-contained helper to avoid pulling chrono; build time is a best-effort.
#[cfg(test)]
fn test_fallback_logger() -> AsyncLogger {
    // Create a channel and leak the receiver to keep it alive without a runtime.
    let (tx, rx) = mpsc::channel::<LogRecord>(1024);
    let _ = Box::leak(Box::new(rx));
    AsyncLogger { tx }
}
