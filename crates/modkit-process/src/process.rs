//! Handle to a running child process

use crate::ProcessError;
use async_trait::async_trait;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tracing::{debug, warn};

/// Readable end of a child stream
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable end of a child stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How a child process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Normal exit with a code
    pub fn exited(code: i32) -> Self {
        Self { code: Some(code), signal: None }
    }

    /// Termination by a signal
    pub fn signaled(signal: i32) -> Self {
        Self { code: None, signal: Some(signal) }
    }

    /// Check whether the process exited with code zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a platform exit status
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Wait/kill control over a child process
#[async_trait]
pub trait ProcessControl: Send {
    /// OS process id, if known
    fn id(&self) -> Option<u32>;

    /// Wait for the process to terminate
    async fn wait(&mut self) -> io::Result<ExitInfo>;

    /// Ask the process to terminate without waiting
    fn start_kill(&mut self) -> io::Result<()>;
}

#[async_trait]
impl ProcessControl for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        Child::wait(self).await.map(ExitInfo::from_status)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }
}

/// A spawned module executable with piped standard streams
///
/// Dropping a handle whose process has not been observed to exit kills it.
pub struct ModuleProcess {
    /// Child stdin
    stdin: Option<BoxedWriter>,
    /// Child stdout, until taken by a reader
    stdout: Option<BoxedReader>,
    /// Child stderr, until taken by a reader
    stderr: Option<BoxedReader>,
    /// Wait/kill control
    control: Box<dyn ProcessControl>,
    /// Cached termination status
    exit: Option<ExitInfo>,
    /// Process group led by the child
    group: Option<u32>,
}

impl ModuleProcess {
    /// Assemble a process handle from its parts
    pub fn from_parts(
        stdin: BoxedWriter,
        stdout: BoxedReader,
        stderr: BoxedReader,
        control: Box<dyn ProcessControl>,
    ) -> Self {
        Self {
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
            control,
            exit: None,
            group: None,
        }
    }

    /// Kill the whole process group `pgid` along with the child
    ///
    /// Only meaningful when the child was started as the leader of that
    /// group.
    pub fn with_process_group(mut self, pgid: u32) -> Self {
        self.group = Some(pgid);
        self
    }

    /// Wrap a tokio child spawned with all three streams piped
    pub fn from_child(mut child: Child) -> Result<Self, ProcessError> {
        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?;

        Ok(Self::from_parts(
            Box::new(stdin),
            Box::new(stdout),
            Box::new(stderr),
            Box::new(child),
        ))
    }

    /// OS process id, if known
    pub fn id(&self) -> Option<u32> {
        self.control.id()
    }

    /// Write bytes to the child's stdin
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ProcessError> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::StdinClosed)?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close the child's stdin so it observes EOF
    pub async fn close_stdin(&mut self) -> Result<(), ProcessError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        Ok(())
    }

    /// Take the stdout reader
    pub fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    /// Take the stderr reader
    pub fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take()
    }

    /// Wait for the child to terminate
    pub async fn wait(&mut self) -> Result<ExitInfo, ProcessError> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let exit = self.control.wait().await?;
        debug!("Module process exited: pid={:?}, {}", self.control.id(), exit);
        self.exit = Some(exit);
        Ok(exit)
    }

    /// Ask the child to terminate
    pub fn kill(&mut self) -> Result<(), ProcessError> {
        if self.exit.is_some() {
            return Ok(());
        }
        self.kill_group();
        self.control.start_kill()?;
        Ok(())
    }

    // The leader is not reaped yet, so the group id cannot have been reused
    fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.group {
            if let Err(e) = signal_group(pgid) {
                debug!("Failed to kill process group {}: {}", pgid, e);
            }
        }
    }

    /// Termination status, once observed
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit
    }
}

impl fmt::Debug for ModuleProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleProcess")
            .field("pid", &self.control.id())
            .field("stdin_open", &self.stdin.is_some())
            .field("exit", &self.exit)
            .field("group", &self.group)
            .finish()
    }
}

impl Drop for ModuleProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            // Try to kill the process if it's still running
            self.kill_group();
            if let Err(e) = self.control.start_kill() {
                warn!("Failed to kill module process {:?}: {}", self.control.id(), e);
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32) -> io::Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "process group id out of range"))?;
    killpg(Pid::from_raw(pgid), Signal::SIGKILL).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::scripted_process;

    #[test]
    fn test_exit_info_display() {
        assert_eq!(ExitInfo::exited(0).to_string(), "exit code 0");
        assert_eq!(ExitInfo::signaled(9).to_string(), "signal 9");
        assert!(ExitInfo::exited(0).success());
        assert!(!ExitInfo::exited(2).success());
        assert!(!ExitInfo::signaled(15).success());
    }

    #[tokio::test]
    async fn test_write_reaches_child_stdin() {
        let (mut process, mut child) = scripted_process();
        process.write(b"{\"id\":1}\n").await.unwrap();

        let request = child.read_line().await.unwrap();
        assert_eq!(request, b"{\"id\":1}\n".to_vec());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (mut process, _child) = scripted_process();
        process.close_stdin().await.unwrap();

        let result = process.write(b"late").await;
        assert!(matches!(result, Err(ProcessError::StdinClosed)));
    }

    #[tokio::test]
    async fn test_wait_caches_exit() {
        let (mut process, mut child) = scripted_process();
        child.exit(3);

        assert_eq!(process.wait().await.unwrap(), ExitInfo::exited(3));
        assert_eq!(process.wait().await.unwrap(), ExitInfo::exited(3));
        assert_eq!(process.exit_info(), Some(ExitInfo::exited(3)));
        // Killing an exited process is a no-op
        assert!(process.kill().is_ok());
    }

    #[tokio::test]
    async fn test_kill_terminates_wait() {
        let (mut process, child) = scripted_process();
        process.kill().unwrap();

        let exit = process.wait().await.unwrap();
        assert_eq!(exit.signal, Some(9));
        assert!(child.was_killed());
    }

    #[tokio::test]
    async fn test_drop_kills_running_process() {
        let (process, child) = scripted_process();
        drop(process);
        assert!(child.was_killed());
    }
}
