//! # Modkit Protocol
//!
//! JSON-RPC message types, the incremental JSON stream codec, and the
//! request/response correlation table used to talk to module executables.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// JSON-RPC message types
pub mod message;

/// Incremental JSON codec for byte streams
pub mod codec;

/// Outbound call tracking and response correlation
pub mod rpc;

/// Typed form of the `describe` result document
pub mod describe;

/// Error types for protocol operations
pub mod error;

pub use codec::JsonCodec;
pub use describe::{DescribeResult, OptionSpec, DESCRIBE_METHOD};
pub use error::ProtocolError;
pub use message::{ErrorCode, Id, Message, Request, Response, RpcError, JSONRPC_VERSION};
pub use rpc::{Dispatch, RpcClient, RpcResult};
