//! Launcher abstraction and the local implementation

use async_trait::async_trait;
use crate::{ModuleProcess, ProcessError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Environment variables an isolated child keeps from the host
pub const ISOLATED_ENV_ALLOWLIST: &[&str] = &[
    "PATH", "HOME", "USER", "LOGNAME", "LANG", "TERM", "SHELL", "TMPDIR",
];

/// Spawns module executables
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start `path` with piped standard streams
    async fn spawn(&self, path: &Path, options: &SpawnOptions) -> Result<ModuleProcess, ProcessError>;
}

/// How a child is started
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Command-line arguments
    pub args: Vec<String>,
    /// Extra environment variables, applied last
    pub env: HashMap<String, String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Start from a scrubbed environment in a new process group
    pub isolated: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            isolated: false,
        }
    }
}

impl SpawnOptions {
    /// Options for a child that must not share the host's shell state
    pub fn isolated() -> Self {
        Self {
            isolated: true,
            ..Default::default()
        }
    }

    /// Add an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory
    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Build the tokio command for `path`
    pub fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(path);
        cmd.args(&self.args);

        if self.isolated {
            cmd.env_clear();
            for key in ISOLATED_ENV_ALLOWLIST {
                if let Some(value) = std::env::var_os(key) {
                    cmd.env(key, value);
                }
            }
            #[cfg(unix)]
            cmd.process_group(0);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped())
           .stdout(Stdio::piped())
           .stderr(Stdio::piped())
           .kill_on_drop(true);

        cmd
    }
}

/// Launcher for executables on the local filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalLauncher;

impl LocalLauncher {
    /// Create a new local launcher
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for LocalLauncher {
    async fn spawn(&self, path: &Path, options: &SpawnOptions) -> Result<ModuleProcess, ProcessError> {
        debug!("Spawning module process: {:?} (isolated={})", path, options.isolated);

        let child = options.command(path).spawn().map_err(|source| ProcessError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;

        let pid = child.id();
        debug!("Spawned module process: {:?}, pid={:?}", path, pid);

        let process = ModuleProcess::from_child(child)?;
        match pid {
            // The isolated child leads a group of its own
            Some(pid) if cfg!(unix) && options.isolated => Ok(process.with_process_group(pid)),
            _ => Ok(process),
        }
    }
}
