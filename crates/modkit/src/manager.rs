//! Module catalog and metadata coordination
//!
//! The [`ModuleManager`] owns every discovered [`Module`]. Describe
//! exchanges run on their own tasks and report back through a channel; the
//! manager applies those outcomes only when the host drives it through
//! [`ModuleManager::poll_events`], [`ModuleManager::next_event`] or
//! [`ModuleManager::settle`], so the catalog has a single writer.

use crate::config::ManagerConfig;
use crate::discovery;
use crate::log::{LogSink, TracingSink};
use crate::module::Module;
use crate::session::{ProtocolSession, SessionEvent};
use crate::{ModuleError, Result};
use modkit_process::{LocalLauncher, ProcessLauncher};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a metadata request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataStatus {
    /// Metadata was already populated; nothing was started
    Available,
    /// A describe exchange was started
    Requested,
    /// A describe exchange is already running for this module
    Pending,
}

/// Bookkeeping for a running describe exchange
#[derive(Debug)]
struct LiveSession {
    id: Uuid,
    task: JoinHandle<()>,
    failed: bool,
}

/// Owner of the module catalog
pub struct ModuleManager {
    /// Modules by fully-qualified name
    catalog: BTreeMap<String, Module>,
    /// Starts module processes
    launcher: Arc<dyn ProcessLauncher>,
    /// Operator-facing sink
    log: Arc<dyn LogSink>,
    /// Configuration
    config: ManagerConfig,
    /// Handed to every session
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Session outcomes not yet applied
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    /// Running exchanges by module name
    sessions: HashMap<String, LiveSession>,
}

impl ModuleManager {
    /// Create a manager with a launcher and configuration
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: ManagerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            catalog: BTreeMap::new(),
            launcher,
            log: Arc::new(TracingSink),
            config,
            events_tx,
            events_rx,
            sessions: HashMap::new(),
        }
    }

    /// Create a manager that runs modules on the local machine
    pub fn local() -> Self {
        Self::new(Arc::new(LocalLauncher::new()), ManagerConfig::default())
    }

    /// Install the host's log sink
    pub fn register_log_sink(&mut self, sink: Arc<dyn LogSink>) {
        self.log = sink;
    }

    /// Active configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Register every module executable below `root`
    ///
    /// Returns the number of filesystem entries visited. Modules found
    /// before an I/O error stay registered.
    pub fn load_path(&mut self, root: impl AsRef<Path>) -> Result<usize> {
        let root = root.as_ref();
        self.log.info(&format!("adding modules from {}", root.display()));

        let marker = self.config.marker.clone();
        let mut found: Vec<(PathBuf, String)> = Vec::new();
        let walked = discovery::walk(root, &mut |path, metadata| {
            if !discovery::is_module_candidate(metadata) {
                return;
            }
            match discovery::derive_fullname(root, path, &marker) {
                Some(name) => found.push((path.to_path_buf(), name)),
                None => debug!("No module name for {:?}", path),
            }
        });

        for (path, name) in found {
            debug!("Registering module {} from {:?}", name, path);
            self.insert(Module::new(path, name));
        }

        let visited = walked?;
        info!("Loaded modules from {:?}: {} entries visited, {} modules", root, visited, self.catalog.len());
        Ok(visited)
    }

    /// Add a module, replacing any record with the same name
    ///
    /// A describe exchange still running for the replaced record is
    /// aborted, which kills its process. Returns the replaced record.
    pub fn insert(&mut self, module: Module) -> Option<Module> {
        let name = module.name().to_string();
        if let Some(live) = self.sessions.remove(&name) {
            debug!("Aborting session {} of replaced module {}", live.id, name);
            live.task.abort();
        }
        self.catalog.insert(name, module)
    }

    /// Modules whose names start with `pattern`, in name order
    ///
    /// An empty pattern matches nothing.
    pub fn find_modules(&self, pattern: &str) -> Vec<&Module> {
        if pattern.is_empty() {
            return Vec::new();
        }
        self.catalog
            .range::<str, _>((Bound::Included(pattern), Bound::Unbounded))
            .take_while(|(name, _)| name.starts_with(pattern))
            .map(|(_, module)| module)
            .collect()
    }

    /// Module by exact name
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.catalog.get(name)
    }

    /// Mutable module by exact name
    pub fn module_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.catalog.get_mut(name)
    }

    /// Iterate over all modules in name order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.catalog.values()
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    /// Check whether no modules are registered
    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Start a describe exchange for `name` unless one is unnecessary
    ///
    /// Returns as soon as the request is written; the outcome is applied
    /// by a later [`poll_events`](Self::poll_events),
    /// [`next_event`](Self::next_event) or [`settle`](Self::settle).
    pub async fn get_metadata(&mut self, name: &str) -> Result<MetadataStatus> {
        let module = self
            .catalog
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        if module.is_described() {
            return Ok(MetadataStatus::Available);
        }
        if self.sessions.contains_key(name) {
            return Ok(MetadataStatus::Pending);
        }

        let path = module.path().to_path_buf();
        let process = match self.launcher.spawn(&path, &self.config.spawn_options).await {
            Ok(process) => process,
            Err(e) => {
                self.log.bad(&format!("failed to start module {}: {}", name, e));
                return Err(e.into());
            }
        };

        let session = ProtocolSession::new(
            name,
            process,
            &self.config,
            Arc::clone(&self.log),
            self.events_tx.clone(),
        );
        let id = session.id();

        let task = match session.start().await {
            Ok(task) => task,
            Err(e) => {
                self.log.bad(&format!("failed to query module {}: {}", name, e));
                return Err(e);
            }
        };

        debug!(module = %name, session = %id, "Describe requested");
        self.sessions.insert(name.to_string(), LiveSession { id, task, failed: false });
        Ok(MetadataStatus::Requested)
    }

    /// Check whether a describe exchange is running for `name`
    pub fn is_pending(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Number of running describe exchanges
    pub fn pending_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply every outcome that has already arrived
    ///
    /// Returns the number of events applied.
    pub fn poll_events(&mut self) -> usize {
        let mut applied = 0;
        while self.apply_queued().is_some() {
            applied += 1;
        }
        applied
    }

    /// Wait for the next outcome and apply it
    ///
    /// Returns `None` once no exchange is running and nothing is queued.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.apply_queued() {
            return Some(event);
        }
        if let Some(event) = self.reap_finished() {
            return Some(event);
        }
        if self.sessions.is_empty() {
            return None;
        }

        let event = self.events_rx.recv().await?;
        self.apply(&event);
        Some(event)
    }

    fn apply_queued(&mut self) -> Option<SessionEvent> {
        let event = self.events_rx.try_recv().ok()?;
        self.apply(&event);
        Some(event)
    }

    /// Drop sessions whose task ended without a `Closed` event
    ///
    /// Returns a queued event instead when one is available, leaving every
    /// session in place.
    fn reap_finished(&mut self) -> Option<SessionEvent> {
        let finished: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, live)| live.task.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        // Sessions publish before they finish, so whatever a finished task
        // sent is queued by now.
        if let Some(event) = self.apply_queued() {
            return Some(event);
        }
        for name in finished {
            if let Some(live) = self.sessions.remove(&name) {
                warn!("Session {} for {} ended without closing", live.id, name);
            }
        }
        None
    }

    /// Wait until every running exchange has closed
    pub async fn settle(&mut self) {
        while self.next_event().await.is_some() {}
    }

    fn apply(&mut self, event: &SessionEvent) {
        let name = event.module();
        let live = match self.sessions.get_mut(name) {
            Some(live) if live.id == event.session() => live,
            _ => {
                debug!(module = %name, session = %event.session(), "Ignoring event from stale session");
                return;
            }
        };

        match event {
            SessionEvent::Described { document, .. } => {
                let Some(module) = self.catalog.get_mut(name) else {
                    return;
                };
                let populated = module.populate(
                    document.clone(),
                    &self.config.default_license,
                    &self.config.default_rank,
                );
                if populated {
                    info!(module = %name, "Module described with {} option(s)", module.options().len());
                }
            }
            SessionEvent::Failed { reason, .. } => {
                live.failed = true;
                self.log.bad(&format!("failed to describe module {}: {}", name, reason));
            }
            SessionEvent::Closed { exit, .. } => {
                let failed = live.failed;
                self.sessions.remove(name);

                let described = self.catalog.get(name).map_or(false, Module::is_described);
                if !described && !failed {
                    let status = exit.map_or_else(|| "unknown status".to_string(), |e| e.to_string());
                    self.log.bad(&format!("module {} exited ({}) without describing itself", name, status));
                }
            }
        }
    }

    /// Set an option on a module
    pub fn set_option(&mut self, module: &str, option: &str, value: &str) -> Result<()> {
        let record = self
            .catalog
            .get_mut(module)
            .ok_or_else(|| ModuleError::NotFound(module.to_string()))?;
        let changed = record.set_option(option, value)?;
        debug!(module = %module, "Set {} = {}", changed, value);
        Ok(())
    }

    /// Print a module's metadata to the line sink
    pub fn log_metadata(&self, name: &str) -> Result<()> {
        let module = self
            .catalog
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;
        module.log_metadata(self.log.as_ref());
        Ok(())
    }

    /// Abort every running exchange and release all records
    pub fn shutdown(&mut self) {
        self.abort_sessions();
        self.catalog.clear();
        while self.events_rx.try_recv().is_ok() {}
    }

    fn abort_sessions(&mut self) {
        for (name, live) in self.sessions.drain() {
            debug!("Aborting session {} for {}", live.id, name);
            live.task.abort();
        }
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("modules", &self.catalog.len())
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for ModuleManager {
    fn drop(&mut self) {
        self.abort_sessions();
    }
}

#[cfg(test)]
mod tests;
