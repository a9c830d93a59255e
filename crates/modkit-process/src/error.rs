//! Process-specific error types

use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Process lifecycle errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be started
    #[error("Failed to spawn {path:?}: {source}")]
    Spawn {
        /// Executable path
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A standard stream was not piped
    #[error("Child {0} is not piped")]
    MissingPipe(&'static str),

    /// Standard input was already closed
    #[error("Child stdin is closed")]
    StdinClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
