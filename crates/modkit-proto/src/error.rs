//! Error types for protocol operations

use thiserror::Error;
use crate::message::{ErrorCode, RpcError};

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Structurally valid JSON that is not a JSON-RPC message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Peer announced a JSON-RPC version we do not speak
    #[error("Unsupported JSON-RPC version: {0}")]
    VersionMismatch(String),

    /// Incomplete data retained past the buffer limit
    #[error("Buffered message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Bytes currently buffered
        size: usize,
        /// Maximum allowed size
        max: usize
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ProtocolError> for RpcError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Serialization(msg) => {
                RpcError::new(ErrorCode::ParseError, msg)
            }
            ProtocolError::InvalidMessage(msg) => {
                RpcError::new(ErrorCode::InvalidRequest, msg)
            }
            ProtocolError::VersionMismatch(version) => {
                RpcError::new(
                    ErrorCode::InvalidRequest,
                    format!("Unsupported JSON-RPC version: {}", version)
                )
            }
            ProtocolError::MessageTooLarge { size, max } => {
                RpcError::new(
                    ErrorCode::InternalError,
                    format!("Message too large: {} bytes (max: {})", size, max)
                )
            }
            ProtocolError::Io(e) => {
                RpcError::new(ErrorCode::InternalError, format!("I/O error: {}", e))
            }
        }
    }
}
