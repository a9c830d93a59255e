//! Manager configuration

use modkit_process::SpawnOptions;
use std::time::Duration;

/// Path component that anchors fully-qualified module names
pub const DEFAULT_MARKER: &str = "modules";

/// License reported when a module does not declare one
pub const DEFAULT_LICENSE: &str = "unspecified";

/// Rank reported when a module does not declare one
pub const DEFAULT_RANK: &str = "Excellent";

/// Module manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Path component after which the module name starts
    pub marker: String,
    /// Upper bound on a describe exchange
    pub describe_timeout: Duration,
    /// How long to keep draining output after the child exits
    pub drain_grace: Duration,
    /// Maximum incomplete stdout data retained per session
    pub max_buffer_size: usize,
    /// Drop responses announcing a foreign JSON-RPC version
    pub check_version: bool,
    /// License reported when a module does not declare one
    pub default_license: String,
    /// Rank reported when a module does not declare one
    pub default_rank: String,
    /// How module executables are started
    pub spawn_options: SpawnOptions,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.to_string(),
            describe_timeout: Duration::from_secs(30),
            drain_grace: Duration::from_millis(500),
            max_buffer_size: modkit_proto::codec::MAX_BUFFER_SIZE,
            check_version: true,
            default_license: DEFAULT_LICENSE.to_string(),
            default_rank: DEFAULT_RANK.to_string(),
            spawn_options: SpawnOptions::isolated(),
        }
    }
}

impl ManagerConfig {
    /// Set the name marker component
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Set the describe timeout
    pub fn with_describe_timeout(mut self, timeout: Duration) -> Self {
        self.describe_timeout = timeout;
        self
    }

    /// Set the post-exit drain grace period
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Set the per-session buffer limit
    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Enable or disable the JSON-RPC version check
    pub fn with_version_check(mut self, check: bool) -> Self {
        self.check_version = check;
        self
    }

    /// Set the license and rank used when a module omits them
    pub fn with_defaults(mut self, license: impl Into<String>, rank: impl Into<String>) -> Self {
        self.default_license = license.into();
        self.default_rank = rank.into();
        self
    }

    /// Set the spawn options
    pub fn with_spawn_options(mut self, options: SpawnOptions) -> Self {
        self.spawn_options = options;
        self
    }
}
