//! Error types for the modkit library

use thiserror::Error;
use std::path::PathBuf;

/// Main error type for modkit operations
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Module root could not be read or walked
    #[error("Discovery error at {path:?}: {source}")]
    Discovery {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No module registered under this name
    #[error("Module not found: {0}")]
    NotFound(String),

    /// No option matched the requested name
    #[error("Option {option} not found in module {module}")]
    OptionNotFound {
        /// Module name
        module: String,
        /// Requested option name
        option: String,
    },

    /// Process lifecycle errors
    #[error("Process error: {0}")]
    Process(#[from] modkit_process::ProcessError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] modkit_proto::ProtocolError),

    /// Session errors
    #[error("Session error: {0}")]
    Session(String),
}

impl From<serde_json::Error> for ModuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ModuleError::OptionNotFound {
            module: "recon/list_users".to_string(),
            option: "RHOST".to_string(),
        };
        assert_eq!(error.to_string(), "Option RHOST not found in module recon/list_users");

        let error = ModuleError::NotFound("recon/missing".to_string());
        assert_eq!(error.to_string(), "Module not found: recon/missing");
    }

    #[test]
    fn test_process_error_conversion() {
        let error: ModuleError = modkit_process::ProcessError::StdinClosed.into();
        assert!(matches!(error, ModuleError::Process(_)));
    }
}
