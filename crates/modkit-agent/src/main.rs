//! Modkit Agent Binary
//!
//! Discovers module executables, asks each one to describe itself and
//! prints what it learned.
//!
//! Usage: `modkit-agent [ROOT] [PATTERN]`

use anyhow::{Context, Result};
use modkit::{ManagerConfig, ModuleManager, TracingSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_ROOT: &str = "./modules";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let root = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_ROOT.to_string()));
    let pattern = args.next();

    let config = modkit_agent::settings::from_env(ManagerConfig::default())?;
    info!("Starting modkit agent: root={:?}, describe_timeout={:?}", root, config.describe_timeout);

    let launcher = Arc::new(modkit::process::LocalLauncher::new());
    let mut manager = ModuleManager::new(launcher, config);
    manager.register_log_sink(Arc::new(TracingSink));

    manager
        .load_path(&root)
        .with_context(|| format!("Failed to load modules from {}", root.display()))?;

    let names: Vec<String> = match pattern.as_deref() {
        Some(pattern) => manager.find_modules(pattern).iter().map(|m| m.name().to_string()).collect(),
        None => manager.modules().map(|m| m.name().to_string()).collect(),
    };
    info!("Describing {} module(s)", names.len());

    for name in &names {
        if let Err(e) = manager.get_metadata(name).await {
            error!("Failed to request metadata for {}: {}", name, e);
        }
    }
    manager.settle().await;

    for name in &names {
        manager.log_metadata(name)?;
    }

    manager.shutdown();
    info!("Agent shutting down");
    Ok(())
}
