//! Unit tests for the module manager

use super::*;
use crate::log::{BufferedSink, LogLevel};
use modkit_process::test_utils::{ScriptedChild, ScriptedLauncher};
use serde_json::{json, Value};
use std::time::Duration;

fn manager_with(
    launcher: Arc<ScriptedLauncher>,
    config: ManagerConfig,
) -> (ModuleManager, Arc<BufferedSink>) {
    let sink = Arc::new(BufferedSink::new());
    let mut manager = ModuleManager::new(launcher, config);
    manager.register_log_sink(sink.clone());
    for name in ["recon/list_users", "recon/netstat", "post/dump_hashes"] {
        manager.insert(Module::new(format!("/opt/modules/{}", name), name));
    }
    (manager, sink)
}

fn manager() -> (ModuleManager, Arc<ScriptedLauncher>, Arc<BufferedSink>) {
    let launcher = Arc::new(ScriptedLauncher::new());
    let config = ManagerConfig::default().with_drain_grace(Duration::from_millis(100));
    let (manager, sink) = manager_with(launcher.clone(), config);
    (manager, launcher, sink)
}

/// Answer the pending describe request with `result` and exit
async fn answer(child: &mut ScriptedChild, result: Value) {
    let line = child.read_line().await.unwrap();
    let request: Value = serde_json::from_slice(&line).unwrap();
    let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": result});
    child.write_stdout(reply.to_string().as_bytes()).await.unwrap();
    child.finish(0);
}

#[test]
fn test_find_modules_by_prefix() {
    let (manager, _launcher, _sink) = manager();

    let names: Vec<_> = manager.find_modules("recon/").iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["recon/list_users", "recon/netstat"]);

    assert_eq!(manager.find_modules("recon/list_users").len(), 1);
    assert_eq!(manager.find_modules("p").len(), 1);
    assert!(manager.find_modules("").is_empty());
    assert!(manager.find_modules("Recon").is_empty());
    assert!(manager.find_modules("recon/list_users/x").is_empty());
    assert_eq!(manager.len(), 3);
}

#[tokio::test]
async fn test_get_metadata_unknown_module() {
    let (mut manager, launcher, _sink) = manager();

    let result = manager.get_metadata("recon/missing").await;
    assert!(matches!(result, Err(ModuleError::NotFound(_))));
    assert_eq!(launcher.spawn_count(), 0);
}

#[tokio::test]
async fn test_describe_populates_module() {
    let (mut manager, launcher, _sink) = manager();
    let mut child = launcher.prepare();

    let status = manager.get_metadata("recon/list_users").await.unwrap();
    assert_eq!(status, MetadataStatus::Requested);
    assert!(manager.is_pending("recon/list_users"));
    assert_eq!(launcher.spawned(), vec![PathBuf::from("/opt/modules/recon/list_users")]);

    answer(
        &mut child,
        json!({
            "name": "Lister",
            "date": "2016-01-01",
            "options": {"TARGET": {"type": "string", "default": "127.0.0.1"}}
        }),
    )
    .await;
    manager.settle().await;

    assert!(!manager.is_pending("recon/list_users"));
    let module = manager.module("recon/list_users").unwrap();
    let meta = module.metadata().unwrap();
    assert_eq!(meta.name.as_deref(), Some("Lister"));
    assert_eq!(meta.license, "unspecified");
    assert_eq!(meta.rank, "Excellent");

    let target = module.options().get("TARGET").unwrap();
    assert_eq!(target.value(), Some("127.0.0.1"));
    assert_eq!(target.kind(), "string");
}

#[tokio::test]
async fn test_get_metadata_at_most_once() {
    let (mut manager, launcher, _sink) = manager();
    let mut child = launcher.prepare();

    assert_eq!(manager.get_metadata("recon/netstat").await.unwrap(), MetadataStatus::Requested);
    assert_eq!(manager.get_metadata("recon/netstat").await.unwrap(), MetadataStatus::Pending);

    answer(&mut child, json!({"name": "Netstat"})).await;
    manager.settle().await;

    let before = manager.module("recon/netstat").unwrap().metadata().cloned();
    assert_eq!(manager.get_metadata("recon/netstat").await.unwrap(), MetadataStatus::Available);
    assert_eq!(manager.module("recon/netstat").unwrap().metadata().cloned(), before);
    assert_eq!(launcher.spawn_count(), 1);
}

#[tokio::test]
async fn test_spawn_failure_leaves_module_idle() {
    let (mut manager, launcher, sink) = manager();

    let result = manager.get_metadata("post/dump_hashes").await;
    assert!(matches!(result, Err(ModuleError::Process(_))));
    assert!(!manager.is_pending("post/dump_hashes"));
    assert!(!manager.module("post/dump_hashes").unwrap().is_described());
    assert!(sink.messages(LogLevel::Bad)[0].starts_with("failed to start module post/dump_hashes"));

    // A later attempt can still succeed
    let mut child = launcher.prepare();
    assert_eq!(manager.get_metadata("post/dump_hashes").await.unwrap(), MetadataStatus::Requested);
    answer(&mut child, json!({"name": "Dump"})).await;
    manager.settle().await;
    assert!(manager.module("post/dump_hashes").unwrap().is_described());
}

#[tokio::test]
async fn test_exit_without_reply_allows_retry() {
    let (mut manager, launcher, sink) = manager();
    let mut child = launcher.prepare();

    manager.get_metadata("recon/list_users").await.unwrap();
    child.read_line().await.unwrap();
    child.finish(1);
    manager.settle().await;

    assert!(!manager.module("recon/list_users").unwrap().is_described());
    assert_eq!(
        sink.messages(LogLevel::Bad),
        vec!["module recon/list_users exited (exit code 1) without describing itself".to_string()]
    );

    let mut retry = launcher.prepare();
    assert_eq!(manager.get_metadata("recon/list_users").await.unwrap(), MetadataStatus::Requested);
    answer(&mut retry, json!({})).await;
    manager.settle().await;
    assert!(manager.module("recon/list_users").unwrap().is_described());
}

#[tokio::test]
async fn test_timeout_is_reported_once() {
    let launcher = Arc::new(ScriptedLauncher::new());
    let config = ManagerConfig::default()
        .with_describe_timeout(Duration::from_millis(50))
        .with_drain_grace(Duration::from_millis(50));
    let (mut manager, sink) = manager_with(launcher.clone(), config);
    let child = launcher.prepare();

    manager.get_metadata("recon/list_users").await.unwrap();
    manager.settle().await;

    assert!(child.was_killed());
    let bad = sink.messages(LogLevel::Bad);
    assert_eq!(bad.len(), 1);
    assert!(bad[0].starts_with("failed to describe module recon/list_users: no reply within"));
}

#[tokio::test]
async fn test_next_event_reports_outcomes_in_order() {
    let (mut manager, launcher, _sink) = manager();
    let mut child = launcher.prepare();

    manager.get_metadata("recon/list_users").await.unwrap();
    answer(&mut child, json!({"name": "Lister"})).await;

    let first = manager.next_event().await.unwrap();
    assert!(matches!(first, SessionEvent::Described { .. }));
    assert!(manager.module("recon/list_users").unwrap().is_described());

    let second = manager.next_event().await.unwrap();
    assert!(second.is_closed());
    assert!(manager.next_event().await.is_none());
    assert_eq!(manager.poll_events(), 0);
}

/// Register a live session whose task has already finished
async fn finished_session(manager: &mut ModuleManager, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    let task = tokio::spawn(async {});
    while !task.is_finished() {
        tokio::task::yield_now().await;
    }
    manager.sessions.insert(name.to_string(), LiveSession { id, task, failed: false });
    id
}

#[tokio::test]
async fn test_finished_session_keeps_events_queued_after_last_check() {
    let (mut manager, _launcher, sink) = manager();
    let id = finished_session(&mut manager, "recon/netstat").await;

    // Both events land after next_event last saw an empty queue
    manager
        .events_tx
        .send(SessionEvent::Described {
            module: "recon/netstat".to_string(),
            session: id,
            document: json!({"name": "Netstat"}),
        })
        .unwrap();
    manager
        .events_tx
        .send(SessionEvent::Closed {
            module: "recon/netstat".to_string(),
            session: id,
            exit: None,
            cancelled: 0,
        })
        .unwrap();

    let event = manager.reap_finished().unwrap();
    assert!(matches!(event, SessionEvent::Described { .. }));
    assert!(manager.module("recon/netstat").unwrap().is_described());
    assert!(manager.is_pending("recon/netstat"));

    assert!(manager.next_event().await.unwrap().is_closed());
    assert!(manager.next_event().await.is_none());
    assert!(sink.messages(LogLevel::Bad).is_empty());
}

#[tokio::test]
async fn test_session_ending_without_close_is_reaped() {
    let (mut manager, _launcher, _sink) = manager();
    finished_session(&mut manager, "recon/netstat").await;

    assert!(manager.reap_finished().is_none());
    assert!(!manager.is_pending("recon/netstat"));
    assert!(manager.next_event().await.is_none());
}

#[tokio::test]
async fn test_replacing_module_aborts_session() {
    let (mut manager, launcher, _sink) = manager();
    let child = launcher.prepare();

    manager.get_metadata("recon/netstat").await.unwrap();
    let replaced = manager.insert(Module::new("/opt/modules/recon/netstat.sh", "recon/netstat"));
    assert!(replaced.is_some());
    assert!(!manager.is_pending("recon/netstat"));

    tokio::time::timeout(Duration::from_secs(2), async {
        while !child.was_killed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Nothing from the aborted session reaches the new record
    manager.poll_events();
    assert!(!manager.module("recon/netstat").unwrap().is_described());
}

#[tokio::test]
async fn test_set_option_through_manager() {
    let (mut manager, launcher, _sink) = manager();
    let mut child = launcher.prepare();

    manager.get_metadata("recon/list_users").await.unwrap();
    answer(
        &mut child,
        json!({"options": {"TARGET": {"default": "127.0.0.1"}, "TARGETPORT": {"type": "int"}}}),
    )
    .await;
    manager.settle().await;

    manager.set_option("recon/list_users", "TARGET", "10.0.0.1").unwrap();
    manager.set_option("recon/list_users", "TARGET", "10.0.0.1").unwrap();
    let module = manager.module("recon/list_users").unwrap();
    assert_eq!(module.options().get("TARGET").unwrap().value(), Some("10.0.0.1"));
    assert_eq!(module.options().get("TARGETPORT").unwrap().value(), None);

    assert!(matches!(
        manager.set_option("recon/list_users", "RPORT", "1"),
        Err(ModuleError::OptionNotFound { .. })
    ));
    assert!(matches!(
        manager.set_option("recon/missing", "TARGET", "1"),
        Err(ModuleError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_log_metadata_uses_line_sink() {
    let (manager, _launcher, sink) = manager();

    manager.log_metadata("recon/netstat").unwrap();
    let lines = sink.messages(LogLevel::Line);
    assert_eq!(lines[2], "     Module: recon/netstat");
    assert!(matches!(manager.log_metadata("nope"), Err(ModuleError::NotFound(_))));
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let (mut manager, launcher, _sink) = manager();
    let child = launcher.prepare();

    manager.get_metadata("recon/list_users").await.unwrap();
    manager.shutdown();

    assert!(manager.is_empty());
    assert_eq!(manager.pending_count(), 0);
    assert!(manager.next_event().await.is_none());

    tokio::time::timeout(Duration::from_secs(2), async {
        while !child.was_killed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[cfg(unix)]
#[test]
fn test_load_path_scenario() {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("modules");
    let recon = root.join("recon");
    fs::create_dir_all(&recon).unwrap();

    let exe = recon.join("list_users");
    fs::write(&exe, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(recon.join("readme.txt"), "docs").unwrap();
    fs::set_permissions(recon.join("readme.txt"), fs::Permissions::from_mode(0o644)).unwrap();

    let mut manager = ModuleManager::new(Arc::new(ScriptedLauncher::new()), ManagerConfig::default());
    let sink = Arc::new(BufferedSink::new());
    manager.register_log_sink(sink.clone());

    let visited = manager.load_path(&root).unwrap();
    assert_eq!(visited, 4);
    assert_eq!(manager.len(), 1);

    let found = manager.find_modules("recon/");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name(), "recon/list_users");
    assert_eq!(found[0].path(), exe.as_path());
    assert_eq!(
        sink.messages(LogLevel::Info),
        vec![format!("adding modules from {}", root.display())]
    );
}

#[cfg(unix)]
#[test]
fn test_load_path_last_write_wins() {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("modules");
    fs::create_dir_all(root.join("recon")).unwrap();
    for file in ["recon/netstat", "recon/netstat.sh"] {
        let path = root.join(file);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).unwrap();
    }

    let mut manager = ModuleManager::new(Arc::new(ScriptedLauncher::new()), ManagerConfig::default());
    manager.load_path(&root).unwrap();

    assert_eq!(manager.len(), 1);
    assert_eq!(
        manager.module("recon/netstat").unwrap().path(),
        root.join("recon/netstat.sh").as_path()
    );
}

#[test]
fn test_load_path_missing_root() {
    let mut manager = ModuleManager::new(Arc::new(ScriptedLauncher::new()), ManagerConfig::default());
    let result = manager.load_path("/nonexistent/modkit/modules");
    assert!(matches!(result, Err(ModuleError::Discovery { .. })));
    assert!(manager.is_empty());
}
