//! In-memory processes for tests
//!
//! A scripted process looks like a real child to its owner, while the test
//! holds the other end of every stream and decides when it exits.

use crate::{ExitInfo, ModuleProcess, ProcessControl, ProcessError, ProcessLauncher, SpawnOptions};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{oneshot, Notify};

/// Signal reported when a scripted process is killed
pub const KILL_SIGNAL: i32 = 9;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Test-side end of a scripted process
pub struct ScriptedChild {
    /// What the owner wrote to stdin
    stdin: BufReader<DuplexStream>,
    /// Feeds the owner's stdout reader
    stdout: Option<DuplexStream>,
    /// Feeds the owner's stderr reader
    stderr: Option<DuplexStream>,
    /// Exit trigger
    exit_tx: Option<oneshot::Sender<ExitInfo>>,
    /// Set once the owner kills the process
    killed: Arc<AtomicBool>,
}

struct ScriptedControl {
    exit_rx: Option<oneshot::Receiver<ExitInfo>>,
    kill: Arc<Notify>,
    killed: Arc<AtomicBool>,
    exited: Option<ExitInfo>,
}

/// Create a scripted process and the handle that drives it
pub fn scripted_process() -> (ModuleProcess, ScriptedChild) {
    let (stdin_host, stdin_child) = tokio::io::duplex(PIPE_CAPACITY);
    let (stdout_host, stdout_child) = tokio::io::duplex(PIPE_CAPACITY);
    let (stderr_host, stderr_child) = tokio::io::duplex(PIPE_CAPACITY);
    let (exit_tx, exit_rx) = oneshot::channel();
    let killed = Arc::new(AtomicBool::new(false));

    let control = ScriptedControl {
        exit_rx: Some(exit_rx),
        kill: Arc::new(Notify::new()),
        killed: Arc::clone(&killed),
        exited: None,
    };

    let process = ModuleProcess::from_parts(
        Box::new(stdin_host),
        Box::new(stdout_host),
        Box::new(stderr_host),
        Box::new(control),
    );

    let child = ScriptedChild {
        stdin: BufReader::new(stdin_child),
        stdout: Some(stdout_child),
        stderr: Some(stderr_child),
        exit_tx: Some(exit_tx),
        killed,
    };

    (process, child)
}

impl ScriptedChild {
    /// Read one newline-terminated message the owner wrote to stdin
    pub async fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        self.stdin.read_until(b'\n', &mut line).await?;
        Ok(line)
    }

    /// Write bytes to the owner's stdout
    pub async fn write_stdout(&mut self, data: &[u8]) -> io::Result<()> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.write_all(data).await,
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed")),
        }
    }

    /// Write bytes to the owner's stderr
    pub async fn write_stderr(&mut self, data: &[u8]) -> io::Result<()> {
        match self.stderr.as_mut() {
            Some(stderr) => stderr.write_all(data).await,
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stderr closed")),
        }
    }

    /// Close stdout and stderr so the owner reads EOF
    pub fn close_output(&mut self) {
        self.stdout = None;
        self.stderr = None;
    }

    /// Terminate with an exit code
    pub fn exit(&mut self, code: i32) {
        if let Some(tx) = self.exit_tx.take() {
            let _ = tx.send(ExitInfo::exited(code));
        }
    }

    /// Close all output and terminate with an exit code
    pub fn finish(&mut self, code: i32) {
        self.close_output();
        self.exit(code);
    }

    /// Check whether the owner killed the process
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessControl for ScriptedControl {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        if let Some(exit) = self.exited {
            return Ok(exit);
        }

        let exit = match self.exit_rx.as_mut() {
            Some(rx) => tokio::select! {
                result = rx => result.unwrap_or(ExitInfo::signaled(KILL_SIGNAL)),
                _ = self.kill.notified() => ExitInfo::signaled(KILL_SIGNAL),
            },
            None => ExitInfo::signaled(KILL_SIGNAL),
        };

        self.exit_rx = None;
        self.exited = Some(exit);
        Ok(exit)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.kill.notify_one();
        Ok(())
    }
}

/// Launcher that hands out queued scripted processes in order
#[derive(Default)]
pub struct ScriptedLauncher {
    /// Processes waiting to be spawned
    queue: Mutex<VecDeque<ModuleProcess>>,
    /// Paths passed to `spawn`, including failed attempts
    spawned: Mutex<Vec<PathBuf>>,
}

impl ScriptedLauncher {
    /// Create an empty launcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a process for the next spawn
    pub fn push(&self, process: ModuleProcess) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(process);
    }

    /// Queue a fresh scripted process and return its driving handle
    pub fn prepare(&self) -> ScriptedChild {
        let (process, child) = scripted_process();
        self.push(process);
        child
    }

    /// Number of spawn attempts
    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Paths of all spawn attempts
    pub fn spawned(&self) -> Vec<PathBuf> {
        self.spawned.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn spawn(&self, path: &Path, _options: &SpawnOptions) -> Result<ModuleProcess, ProcessError> {
        self.spawned.lock().unwrap_or_else(|e| e.into_inner()).push(path.to_path_buf());

        let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        next.ok_or_else(|| ProcessError::Spawn {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no scripted process queued"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_scripted_output_reaches_owner() {
        let (mut process, mut child) = scripted_process();
        child.write_stdout(b"hello").await.unwrap();
        child.write_stderr(b"oops").await.unwrap();
        child.close_output();

        let mut stdout = process.take_stdout().unwrap();
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");

        let mut stderr = process.take_stderr().unwrap();
        let mut err = String::new();
        stderr.read_to_string(&mut err).await.unwrap();
        assert_eq!(err, "oops");
    }

    #[tokio::test]
    async fn test_launcher_hands_out_in_order() {
        let launcher = ScriptedLauncher::new();
        let mut first = launcher.prepare();
        let _second = launcher.prepare();

        let mut process = launcher.spawn(Path::new("/m/a"), &SpawnOptions::default()).await.unwrap();
        first.exit(0);
        assert_eq!(process.wait().await.unwrap(), ExitInfo::exited(0));

        assert!(launcher.spawn(Path::new("/m/b"), &SpawnOptions::default()).await.is_ok());
        let exhausted = launcher.spawn(Path::new("/m/c"), &SpawnOptions::default()).await;
        assert!(matches!(exhausted, Err(ProcessError::Spawn { .. })));

        assert_eq!(launcher.spawn_count(), 3);
        assert_eq!(launcher.spawned()[2], PathBuf::from("/m/c"));
    }
}
