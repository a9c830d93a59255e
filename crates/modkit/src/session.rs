//! Per-query protocol sessions
//!
//! A [`ProtocolSession`] owns one spawned module process for the duration of
//! a describe exchange. It writes the request, feeds stdout through the
//! incremental codec, correlates the reply, forwards stderr to the failure
//! sink and publishes its outcome as [`SessionEvent`]s. The session ends
//! only after the child has exited, so nothing it owns outlives the process.

use crate::config::ManagerConfig;
use crate::log::LogSink;
use crate::Result;
use modkit_process::{BoxedReader, ExitInfo, ModuleProcess};
use modkit_proto::{
    Dispatch, JsonCodec, Message, RpcClient, RpcError, RpcResult, DESCRIBE_METHOD,
};
use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const READ_CHUNK: usize = 8192;

/// Why a describe exchange failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionFailure {
    /// The module answered with a JSON-RPC error
    #[error("module returned error: {0}")]
    Rpc(RpcError),

    /// Stdout could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// No reply within the describe timeout
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// Outcome notifications published by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The describe reply arrived
    Described {
        /// Module name
        module: String,
        /// Session id
        session: Uuid,
        /// The describe result document
        document: Value,
    },

    /// The exchange failed before a reply arrived
    Failed {
        /// Module name
        module: String,
        /// Session id
        session: Uuid,
        /// Failure reason
        reason: SessionFailure,
    },

    /// The child exited and the session released its state
    Closed {
        /// Module name
        module: String,
        /// Session id
        session: Uuid,
        /// Termination status, if it could be observed
        exit: Option<ExitInfo>,
        /// Requests still pending at teardown, now cancelled
        cancelled: usize,
    },
}

impl SessionEvent {
    /// Module the event belongs to
    pub fn module(&self) -> &str {
        match self {
            Self::Described { module, .. } | Self::Failed { module, .. } | Self::Closed { module, .. } => module,
        }
    }

    /// Session the event belongs to
    pub fn session(&self) -> Uuid {
        match self {
            Self::Described { session, .. } | Self::Failed { session, .. } | Self::Closed { session, .. } => *session,
        }
    }

    /// Check whether this is the final event of its session
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Transient state for one describe exchange
pub struct ProtocolSession {
    /// Session identifier
    id: Uuid,
    /// Module name
    module: String,
    /// The spawned module
    process: ModuleProcess,
    /// Stdout framing state
    codec: JsonCodec,
    /// Pending request table
    rpc: RpcClient,
    /// Operator-facing sink
    log: Arc<dyn LogSink>,
    /// Outcome channel
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Upper bound on the exchange
    describe_timeout: Duration,
    /// Drain period after exit
    drain_grace: Duration,
    /// A described/failed outcome has been published
    reported: bool,
    /// Stderr header already printed
    stderr_seen: bool,
    /// Partial stderr line
    stderr_line: Vec<u8>,
}

impl ProtocolSession {
    /// Create a session around a freshly spawned process
    pub fn new(
        module: impl Into<String>,
        process: ModuleProcess,
        config: &ManagerConfig,
        log: Arc<dyn LogSink>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            module: module.into(),
            process,
            codec: JsonCodec::with_max_buffer_size(config.max_buffer_size),
            rpc: RpcClient::with_version_check(config.check_version),
            log,
            events,
            describe_timeout: config.describe_timeout,
            drain_grace: config.drain_grace,
            reported: false,
            stderr_seen: false,
            stderr_line: Vec::new(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Send the describe request and run the exchange on a new task
    ///
    /// Fails without spawning a task when the request cannot be written;
    /// the process is killed in that case.
    pub async fn start(mut self) -> Result<JoinHandle<()>> {
        let (request, reply) = self.rpc.call(DESCRIBE_METHOD, None);
        let encoded = self.codec.encode_message(&Message::request(request))?;
        self.process.write(&encoded).await?;

        debug!(module = %self.module, session = %self.id, "Sent describe request");
        Ok(tokio::spawn(self.run(reply)))
    }

    async fn run(mut self, mut reply: oneshot::Receiver<RpcResult>) {
        let mut stdout = self.process.take_stdout();
        let mut stderr = self.process.take_stderr();
        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];

        let deadline = sleep(self.describe_timeout);
        tokio::pin!(deadline);
        let mut deadline_armed = true;
        let mut reply_open = true;
        let mut exited = false;
        let mut exit = None;

        loop {
            if exited && stdout.is_none() && stderr.is_none() {
                break;
            }

            tokio::select! {
                biased;

                result = &mut reply, if reply_open => {
                    reply_open = false;
                    if let Ok(result) = result {
                        self.complete(result).await;
                    }
                }

                read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                    match read {
                        Ok(0) => {
                            trace!(module = %self.module, "stdout closed");
                            stdout = None;
                        }
                        Ok(n) => {
                            if !self.handle_stdout(&out_buf[..n]) {
                                stdout = None;
                            }
                        }
                        Err(e) => {
                            debug!(module = %self.module, "stdout read failed: {}", e);
                            stdout = None;
                        }
                    }
                }

                read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                    match read {
                        Ok(n) if n > 0 => self.handle_stderr(&err_buf[..n]),
                        Ok(_) => {
                            self.flush_stderr();
                            stderr = None;
                        }
                        Err(e) => {
                            debug!(module = %self.module, "stderr read failed: {}", e);
                            self.flush_stderr();
                            stderr = None;
                        }
                    }
                }

                status = self.process.wait(), if !exited => {
                    exited = true;
                    match status {
                        Ok(status) => {
                            debug!(module = %self.module, session = %self.id, "Module exited with {}", status);
                            exit = Some(status);
                        }
                        Err(e) => warn!(module = %self.module, "Failed to wait for module: {}", e),
                    }
                    deadline.as_mut().reset(Instant::now() + self.drain_grace);
                    deadline_armed = true;
                }

                _ = &mut deadline, if deadline_armed => {
                    deadline_armed = false;
                    if exited {
                        debug!(module = %self.module, "Drain grace elapsed with output still open");
                        break;
                    }
                    if !self.reported {
                        warn!(module = %self.module, session = %self.id, "Describe timed out after {:?}", self.describe_timeout);
                        self.fail(SessionFailure::Timeout(self.describe_timeout));
                    }
                    self.kill();
                }
            }
        }

        // A reply delivered by the last stdout chunk has not been observed yet
        if reply_open {
            if let Ok(result) = reply.try_recv() {
                self.complete(result).await;
            }
        }

        let cancelled = self.rpc.cancel_all("session closed");
        if cancelled > 0 {
            debug!(module = %self.module, "Cancelled {} pending request(s)", cancelled);
        }

        info!(module = %self.module, session = %self.id, "Session closed");
        self.publish(SessionEvent::Closed {
            module: self.module.clone(),
            session: self.id,
            exit,
            cancelled,
        });
    }

    /// Feed stdout bytes to the codec; returns `false` once reading must stop
    fn handle_stdout(&mut self, data: &[u8]) -> bool {
        self.codec.extend(data);

        loop {
            match self.codec.try_decode() {
                Ok(Some(value)) => self.dispatch(value),
                Ok(None) => return true,
                Err(e) => {
                    warn!(module = %self.module, "Discarding module output: {}", e);
                    self.codec.clear_buffer();
                    if !self.reported {
                        self.fail(SessionFailure::Decode(e.to_string()));
                    }
                    self.kill();
                    return false;
                }
            }
        }
    }

    fn dispatch(&mut self, value: Value) {
        match self.rpc.process(value) {
            Dispatch::Delivered(id) => trace!(module = %self.module, "Reply for request {}", id),
            Dispatch::Unmatched(Some(id)) => {
                debug!(module = %self.module, "Ignoring response with unknown id {}", id)
            }
            Dispatch::Unmatched(None) => debug!(module = %self.module, "Ignoring response without id"),
            Dispatch::Request(request) => {
                debug!(module = %self.module, "Ignoring inbound {} request", request.method)
            }
            Dispatch::Rejected(reason) => debug!(module = %self.module, "Dropping message: {}", reason),
        }
    }

    fn handle_stderr(&mut self, data: &[u8]) {
        if !self.stderr_seen {
            self.stderr_seen = true;
            self.log.bad(&format!("got error from module {}", self.module));
        }

        self.stderr_line.extend_from_slice(data);
        while let Some(pos) = self.stderr_line.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.stderr_line.drain(..=pos).collect();
            self.log_stderr_line(&line[..pos]);
        }
    }

    fn flush_stderr(&mut self) {
        let rest = std::mem::take(&mut self.stderr_line);
        self.log_stderr_line(&rest);
    }

    fn log_stderr_line(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            self.log.bad(line);
        }
    }

    async fn complete(&mut self, result: RpcResult) {
        if self.reported {
            return;
        }

        match result {
            Ok(document) => {
                debug!(module = %self.module, session = %self.id, "Received describe reply");
                self.reported = true;
                self.publish(SessionEvent::Described {
                    module: self.module.clone(),
                    session: self.id,
                    document,
                });
            }
            Err(error) => {
                warn!(module = %self.module, "Describe failed: {}", error);
                self.fail(SessionFailure::Rpc(error));
            }
        }

        // Nothing more to ask; let the module see EOF and exit
        if let Err(e) = self.process.close_stdin().await {
            debug!(module = %self.module, "Failed to close stdin: {}", e);
        }
    }

    fn fail(&mut self, reason: SessionFailure) {
        self.reported = true;
        self.publish(SessionEvent::Failed {
            module: self.module.clone(),
            session: self.id,
            reason,
        });
    }

    fn kill(&mut self) {
        if let Err(e) = self.process.kill() {
            warn!(module = %self.module, "Failed to kill module: {}", e);
        }
    }

    fn publish(&self, event: SessionEvent) {
        // The manager may be gone already
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("pending", &self.rpc.pending_count())
            .field("reported", &self.reported)
            .finish()
    }
}

async fn read_chunk(reader: &mut Option<BoxedReader>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
