pub mod logger;

pub use logger::{AsyncLogger, LogLevel, init_file_logger};
