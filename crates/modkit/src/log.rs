//! Operator-facing log sinks
//!
//! The host decides where module output ends up. Four channels mirror an
//! interactive console: plain lines, informational notes, successes and
//! failures.

use std::sync::Mutex;
use tracing::{info, warn};

/// Log channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Plain output line
    Line,
    /// Informational message
    Info,
    /// Success message
    Good,
    /// Failure message
    Bad,
}

/// Destination for operator-facing messages
pub trait LogSink: Send + Sync {
    /// Plain output line
    fn line(&self, msg: &str);

    /// Informational message
    fn info(&self, msg: &str);

    /// Success message
    fn good(&self, msg: &str);

    /// Failure message
    fn bad(&self, msg: &str);

    /// Dispatch by level
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Line => self.line(msg),
            LogLevel::Info => self.info(msg),
            LogLevel::Good => self.good(msg),
            LogLevel::Bad => self.bad(msg),
        }
    }
}

/// Sink that forwards everything to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn line(&self, msg: &str) {
        info!(target: "modkit::console", "{}", msg);
    }

    fn info(&self, msg: &str) {
        info!(target: "modkit::console", "[*] {}", msg);
    }

    fn good(&self, msg: &str) {
        info!(target: "modkit::console", "[+] {}", msg);
    }

    fn bad(&self, msg: &str) {
        warn!(target: "modkit::console", "[-] {}", msg);
    }
}

/// Sink that records messages in memory
#[derive(Debug, Default)]
pub struct BufferedSink {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl BufferedSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded message
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.lock().clone()
    }

    /// Messages recorded on one channel
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn push(&self, level: LogLevel, msg: &str) {
        self.lock().push((level, msg.to_string()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(LogLevel, String)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LogSink for BufferedSink {
    fn line(&self, msg: &str) {
        self.push(LogLevel::Line, msg);
    }

    fn info(&self, msg: &str) {
        self.push(LogLevel::Info, msg);
    }

    fn good(&self, msg: &str) {
        self.push(LogLevel::Good, msg);
    }

    fn bad(&self, msg: &str) {
        self.push(LogLevel::Bad, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_sink_channels() {
        let sink = BufferedSink::new();
        sink.line("plain");
        sink.bad("broken");
        sink.log(LogLevel::Good, "fine");

        assert_eq!(sink.entries().len(), 3);
        assert_eq!(sink.messages(LogLevel::Bad), vec!["broken".to_string()]);
        assert_eq!(sink.messages(LogLevel::Good), vec!["fine".to_string()]);

        sink.clear();
        assert!(sink.entries().is_empty());
    }
}
