mod config;
pub use config::{LOG_ENV, LOG_FORMAT_ENV, LoggerConfig};

mod error;
pub use error::LoggerError;

mod format;
pub use format::LoggerFormat;

mod init;
pub use init::logger_init;
