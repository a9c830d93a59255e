//! # Modkit Process
//!
//! Process lifecycle adapter: spawns module executables, exposes their
//! standard streams, and reports termination.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Launcher abstraction and the local implementation
pub mod launcher;

/// Handle to a running child process
pub mod process;

/// In-memory processes for tests
pub mod test_utils;

/// Process-specific error types
pub mod error;

pub use launcher::{LocalLauncher, ProcessLauncher, SpawnOptions};
pub use process::{BoxedReader, BoxedWriter, ExitInfo, ModuleProcess, ProcessControl};
pub use error::ProcessError;
