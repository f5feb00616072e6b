//! Error taxonomy for the execution engine
//!
//! Every variant here is recovered at single-command granularity: the
//! session keeps running after any of them.

use thiserror::Error;

/// Result type alias used throughout the library
pub type Result<T> = std::result::Result<T, ShellError>;

#[derive(Debug, Error)]
pub enum ShellError {
    /// Malformed pipeline or unterminated quoting
    #[error("parse error: {0}")]
    Parse(String),

    /// Redirection file open/create failure and other host I/O problems
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// `fork` failure or other process-orchestration breakage
    #[error("process error: {0}")]
    Process(String),

    /// Command text could not be turned into an argv for `execvp`
    #[error("cannot exec `{0}`")]
    Exec(String),

    /// Command exceeded its time budget and was force-killed
    #[error("`{command}` timed out after {seconds}s and was killed")]
    Timeout { command: String, seconds: u64 },

    /// `kill` failed; callers log this as a warning, it is never fatal
    #[error("failed to signal pid {pid}: {errno}")]
    SignalDelivery { pid: i32, errno: nix::errno::Errno },

    /// Bad or unreadable configuration file
    #[error("config error: {0}")]
    Config(String),

    /// Raw OS error from the syscall layer
    #[error("system error: {0}")]
    Sys(#[from] nix::errno::Errno),
}
