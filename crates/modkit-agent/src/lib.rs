//! # Modkit Agent
//!
//! Host-side entry point for discovering and describing modules, and the
//! responder that modules written in Rust use to answer the host.

#![warn(missing_docs)]

/// Module-side JSON-RPC responder
pub mod responder;

/// Environment overrides for the host binary
pub mod settings;

pub use responder::{DescribeHandler, Handler, ModuleResponder};
