//! Module-side JSON-RPC responder
//!
//! A module written in Rust wraps its stdin/stdout in a [`ModuleResponder`],
//! registers a [`DescribeHandler`] plus any handlers of its own, and calls
//! [`ModuleResponder::run`]. The loop ends when the host closes stdin.

use anyhow::{Context, Result};
use async_trait::async_trait;
use modkit_proto::{
    DescribeResult, ErrorCode, Id, JsonCodec, Message, ProtocolError, Request, Response, RpcError,
    DESCRIBE_METHOD, JSONRPC_VERSION,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{stdin, stdout, AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Handler for one JSON-RPC method
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a call and return its result
    async fn handle(&self, params: Option<Value>) -> Result<Value, RpcError>;
}

/// Answers `describe` with a fixed document
#[derive(Debug, Clone)]
pub struct DescribeHandler {
    result: DescribeResult,
}

impl DescribeHandler {
    /// Create a handler for this description
    pub fn new(result: DescribeResult) -> Self {
        Self { result }
    }
}

#[async_trait]
impl Handler for DescribeHandler {
    async fn handle(&self, _params: Option<Value>) -> Result<Value, RpcError> {
        serde_json::to_value(&self.result)
            .map_err(|e| RpcError::new(ErrorCode::InternalError, e.to_string()))
    }
}

/// Request loop serving registered handlers
pub struct ModuleResponder<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Input stream (typically stdin)
    reader: R,
    /// Output stream (typically stdout)
    writer: W,
    /// Stream codec
    codec: JsonCodec,
    /// Handlers by method name
    handlers: HashMap<String, Arc<dyn Handler>>,
    /// Shutdown signal receiver
    shutdown_rx: Option<oneshot::Receiver<()>>,
    /// Shutdown signal sender, until handed out
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ModuleResponder<tokio::io::Stdin, tokio::io::Stdout> {
    /// Create a responder on stdin/stdout
    pub fn new() -> Self {
        Self::with_io(stdin(), stdout())
    }

    /// Create a stdin/stdout responder that answers `describe`
    pub fn describing(result: DescribeResult) -> Self {
        let mut responder = Self::new();
        responder.register_handler(DESCRIBE_METHOD, Arc::new(DescribeHandler::new(result)));
        responder
    }
}

impl<R, W> ModuleResponder<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a responder with a custom reader/writer
    pub fn with_io(reader: R, writer: W) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Self {
            reader,
            writer,
            codec: JsonCodec::new(),
            handlers: HashMap::new(),
            shutdown_rx: Some(shutdown_rx),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Register a handler for a method
    pub fn register_handler(&mut self, method: impl Into<String>, handler: Arc<dyn Handler>) {
        let method = method.into();
        debug!("Registered handler for method: {}", method);
        self.handlers.insert(method, handler);
    }

    /// Get shutdown sender for graceful shutdown
    ///
    /// Dropping the sender without sending leaves the responder serving
    /// until its input closes.
    pub fn shutdown_sender(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    /// Serve requests until the input closes or shutdown is signalled
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting module responder");

        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .context("Shutdown receiver already taken")?;
        let mut shutdown_armed = true;

        loop {
            tokio::select! {
                signal = &mut shutdown_rx, if shutdown_armed => {
                    if signal.is_ok() {
                        info!("Received shutdown signal, stopping responder");
                        break;
                    }
                    debug!("Shutdown sender dropped, serving until input closes");
                    shutdown_armed = false;
                }

                read = self.codec.read_message(&mut self.reader) => {
                    match read {
                        Ok(Some(value)) => {
                            if let Err(e) = self.handle_message(value).await {
                                error!("Error handling message: {}", e);
                            }
                        }
                        Ok(None) => {
                            info!("Input stream closed, stopping responder");
                            break;
                        }
                        Err(ProtocolError::MessageTooLarge { size, max }) => {
                            warn!("Dropping oversized input: {} bytes (max {})", size, max);
                            self.codec.clear_buffer();
                            let error = ProtocolError::MessageTooLarge { size, max };
                            self.send(Response::error(None, error.into())).await?;
                        }
                        Err(e) => {
                            return Err(e).context("Failed to read request");
                        }
                    }
                }
            }
        }

        info!("Module responder stopped");
        Ok(())
    }

    /// Handle one decoded JSON document
    pub async fn handle_message(&mut self, value: Value) -> Result<()> {
        let request = match Message::from_value(value) {
            Ok(Message::Request(request)) => request,
            Ok(Message::Response(response)) => {
                warn!("Ignoring unexpected response: id={:?}", response.id);
                return Ok(());
            }
            Err(e) => {
                debug!("Rejecting invalid message: {}", e);
                return self.send(Response::error(None, e.into())).await;
            }
        };

        if let Some(version) = request.jsonrpc.as_deref() {
            if version != JSONRPC_VERSION {
                let error = ProtocolError::VersionMismatch(version.to_string());
                return self.reply(request.id, Err(error.into())).await;
            }
        }

        let outcome = self.dispatch(&request).await;
        self.reply(request.id, outcome).await
    }

    async fn dispatch(&self, request: &Request) -> Result<Value, RpcError> {
        debug!("Handling request: method={}, id={:?}", request.method, request.id);

        match self.handlers.get(&request.method) {
            Some(handler) => handler.handle(request.params.clone()).await,
            None => {
                warn!("No handler registered for method: {}", request.method);
                Err(RpcError::new(
                    ErrorCode::MethodNotFound,
                    format!("Method not found: {}", request.method),
                ))
            }
        }
    }

    async fn reply(&mut self, id: Option<Id>, outcome: Result<Value, RpcError>) -> Result<()> {
        // Notifications never get a reply
        let Some(id) = id else {
            if let Err(e) = outcome {
                debug!("Notification failed: {}", e);
            }
            return Ok(());
        };

        let response = match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::error(Some(id), error),
        };
        self.send(response).await
    }

    async fn send(&mut self, response: Response) -> Result<()> {
        self.codec
            .write_message(&mut self.writer, &Message::response(response))
            .await
            .context("Failed to write response")
    }
}

impl Default for ModuleResponder<tokio::io::Stdin, tokio::io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}
