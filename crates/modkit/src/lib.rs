//! # Modkit
//!
//! Extension loading core for an agent: discovers executable modules on
//! disk, asks each one to describe itself over JSON-RPC on its standard
//! streams, and keeps a queryable catalog of modules and their options.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use modkit_proto as proto;
pub use modkit_process as process;

/// Error types for the modkit library
pub mod error;

/// Manager configuration
pub mod config;

/// Operator-facing log sinks
pub mod log;

/// Per-module option registry
pub mod options;

/// Module records and their metadata
pub mod module;

/// Filesystem discovery of module executables
pub mod discovery;

/// Per-query protocol sessions
pub mod session;

/// Module catalog and metadata coordination
pub mod manager;

pub use error::ModuleError;
pub use config::ManagerConfig;
pub use log::{BufferedSink, LogLevel, LogSink, TracingSink};
pub use options::{ModuleOption, OptionRegistry};
pub use module::{Module, ModuleMetadata};
pub use manager::{MetadataStatus, ModuleManager};
pub use session::{SessionEvent, SessionFailure};

/// Result type alias for modkit operations
pub type Result<T> = std::result::Result<T, ModuleError>;
