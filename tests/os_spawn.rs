#![cfg(unix)]

use isolate_host::Core::process::{OsProcessSpawner, ProcessSpawner};
use isolate_host::Core::transport::LoopbackTransport;
use isolate_host::HostError;
use isolate_host::Isolate::{AppModel, IsolateManager, IsolateManagerConfig};
use isolate_host::Messaging::MessagingServiceBuilder;
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until_dead(spawner: &OsProcessSpawner, pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !spawner.is_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
#[serial]
fn running_child_is_alive_until_killed_on_drop() {
    let spawner = OsProcessSpawner::new("sleep");
    let pid = spawner.create_process(&["5".to_owned()]).unwrap();
    assert!(spawner.is_alive(pid));
    assert_eq!(spawner.tracked_children(), 1);
    drop(spawner);

    let observer = OsProcessSpawner::new("sleep");
    assert!(wait_until_dead(&observer, pid));
}

#[test]
#[serial]
fn exited_child_is_reaped() {
    let spawner = OsProcessSpawner::new("true");
    let pid = spawner.create_process(&[]).unwrap();
    assert!(wait_until_dead(&spawner, pid));
    assert_eq!(spawner.tracked_children(), 0);
    assert!(!spawner.is_alive(pid));
}

#[test]
#[serial]
fn missing_program_is_an_io_error() {
    let spawner = OsProcessSpawner::new("/nonexistent/isolate-launcher");
    let err = spawner.create_process(&[]).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

#[test]
#[serial]
fn own_pid_is_alive() {
    let spawner = OsProcessSpawner::new("true");
    assert_eq!(spawner.own_process_id(), std::process::id());
    assert!(spawner.is_alive(spawner.own_process_id()));
}

fn manager_for(program: &str) -> (IsolateManager, LoopbackTransport) {
    let (executive, isolate_side) = LoopbackTransport::pair();
    let messaging = MessagingServiceBuilder::new()
        .with_poll_interval(Duration::from_millis(10))
        .build(Arc::new(executive))
        .unwrap();
    let manager = IsolateManager::new(
        IsolateManagerConfig::new().with_init_timeout(Duration::from_millis(300)),
        Arc::new(OsProcessSpawner::new(program)),
        Arc::new(messaging),
    )
    .unwrap();
    (manager, isolate_side)
}

#[test]
#[serial]
fn process_that_exits_without_reporting_is_destroyed() {
    let (manager, _peer) = manager_for("true");
    let err = manager.new_isolate(AppModel::Main, &[]).unwrap_err();
    assert!(matches!(err, HostError::IsolateDestroyed { .. }));
    assert!(manager.active_isolates().is_empty());
}

#[test]
#[serial]
fn unlaunchable_program_fails_to_spawn() {
    let (manager, _peer) = manager_for("/nonexistent/isolate-launcher");
    assert!(matches!(
        manager.new_isolate(AppModel::Xlet, &[]),
        Err(HostError::ProcessSpawnFailure { .. })
    ));
    assert!(manager.active_isolates().is_empty());
}
