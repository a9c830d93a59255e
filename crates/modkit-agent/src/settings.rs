//! Environment overrides for the host binary

use anyhow::{Context, Result};
use modkit::ManagerConfig;
use std::time::Duration;

/// Describe timeout in milliseconds
pub const ENV_DESCRIBE_TIMEOUT_MS: &str = "MODKIT_DESCRIBE_TIMEOUT_MS";

/// Per-session buffer limit in bytes
pub const ENV_MAX_BUFFER: &str = "MODKIT_MAX_BUFFER";

/// Path component that anchors module names
pub const ENV_MARKER: &str = "MODKIT_MARKER";

/// Apply overrides from the process environment
pub fn from_env(config: ManagerConfig) -> Result<ManagerConfig> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides looked up through `lookup`
pub fn apply_overrides<F>(mut config: ManagerConfig, lookup: F) -> Result<ManagerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_DESCRIBE_TIMEOUT_MS) {
        let millis: u64 = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", ENV_DESCRIBE_TIMEOUT_MS, value))?;
        config.describe_timeout = Duration::from_millis(millis);
    }

    if let Some(value) = lookup(ENV_MAX_BUFFER) {
        config.max_buffer_size = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", ENV_MAX_BUFFER, value))?;
    }

    if let Some(value) = lookup(ENV_MARKER) {
        if !value.is_empty() {
            config.marker = value;
        }
    }

    Ok(config)
}
