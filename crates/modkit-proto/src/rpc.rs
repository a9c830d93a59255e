//! Outbound call tracking and response correlation
//!
//! `RpcClient` allocates request ids, remembers who is waiting for each
//! one, and routes inbound responses back to the waiter. Responses may
//! arrive in any order.

use crate::message::{ErrorCode, Id, Message, Request, RpcError};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Outcome delivered to a waiting caller
pub type RpcResult = Result<Value, RpcError>;

/// What happened to an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Response delivered to the pending caller with this id
    Delivered(Id),
    /// Response for an id nobody is waiting for
    Unmatched(Option<Id>),
    /// Inbound request or notification; the client does not serve these
    Request(Request),
    /// Message dropped before correlation
    Rejected(String),
}

/// Request/response correlation table
#[derive(Debug)]
pub struct RpcClient {
    /// Next id to hand out
    next_id: i64,
    /// Pending requests waiting for responses
    pending: HashMap<Id, oneshot::Sender<RpcResult>>,
    /// Drop messages announcing a foreign protocol version
    check_version: bool,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcClient {
    /// Create a client that enforces the protocol version
    pub fn new() -> Self {
        Self::with_version_check(true)
    }

    /// Create a client with explicit version checking
    pub fn with_version_check(check_version: bool) -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            check_version,
        }
    }

    /// Allocate a fresh request id
    pub fn next_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        Id::Num(id)
    }

    /// Build a method call and register a waiter for its response
    pub fn call(&mut self, method: &str, params: Option<Value>) -> (Request, oneshot::Receiver<RpcResult>) {
        let id = self.next_id();
        let request = Request::new(method, params, id.clone());
        let receiver = self.register(id);
        (request, receiver)
    }

    /// Register a waiter for an externally chosen id
    ///
    /// A previous waiter for the same id is replaced and observes a closed
    /// channel.
    pub fn register(&mut self, id: Id) -> oneshot::Receiver<RpcResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Process an inbound JSON document
    pub fn process(&mut self, value: Value) -> Dispatch {
        let message = match Message::from_value(value) {
            Ok(message) => message,
            Err(e) => return Dispatch::Rejected(e.to_string()),
        };

        if self.check_version {
            if let Err(e) = message.check_version() {
                return Dispatch::Rejected(e.to_string());
            }
        }

        match message {
            Message::Request(request) => Dispatch::Request(request),
            Message::Response(response) => {
                let id = match response.id.clone() {
                    Some(id) => id,
                    None => return Dispatch::Unmatched(None),
                };
                match self.pending.remove(&id) {
                    Some(sender) => {
                        // The waiter may have gone away already
                        let _ = sender.send(response.into_result());
                        Dispatch::Delivered(id)
                    }
                    None => Dispatch::Unmatched(Some(id)),
                }
            }
        }
    }

    /// Check whether a response for this id is still awaited
    pub fn is_pending(&self, id: &Id) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of outstanding requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fail every outstanding request and empty the table
    ///
    /// Returns the number of requests cancelled.
    pub fn cancel_all(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for (_, sender) in self.pending.drain() {
            let _ = sender.send(Err(RpcError::new(ErrorCode::InternalError, reason)));
        }
        count
    }
}
