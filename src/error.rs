//! Application-wide error types.
//!
//! Only the errors that can end a run live here. Per-chapter and
//! per-snapshot failures have their own enums next to the code that raises
//! them and are logged by the pipeline instead of propagated.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("memory error: {0}")]
    Memory(#[from] crate::subsystems::memory::SnapshotError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
